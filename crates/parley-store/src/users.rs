//! CRUD operations for [`User`] records.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use parley_shared::types::{UserId, UserStatus};

use crate::codec;
use crate::database::Database;
use crate::error::{not_found_or, Result, StoreError};
use crate::models::User;

impl Database {
    /// Insert a user mirrored from the account service.
    pub fn insert_user(&self, id: UserId, display_name: Option<&str>) -> Result<User> {
        let user = User {
            id,
            display_name: display_name.map(str::to_string),
            status: UserStatus::Offline,
            created_at: Utc::now(),
        };
        self.conn().execute(
            "INSERT INTO users (id, display_name, status, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                user.id.to_string(),
                user.display_name,
                user.status.as_str(),
                codec::ts(&user.created_at),
            ],
        )?;
        Ok(user)
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, display_name, status, created_at FROM users WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok(User {
                        id: codec::id(row, 0)?,
                        display_name: row.get(1)?,
                        status: codec::variant(row, 2, UserStatus::parse)?,
                        created_at: codec::time(row, 3)?,
                    })
                },
            )
            .map_err(not_found_or)
    }

    pub fn user_exists(&self, id: UserId) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM users WHERE id = ?1",
                params![id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn set_user_status(&self, id: UserId, status: UserStatus) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
