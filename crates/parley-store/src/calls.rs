use rusqlite::params;

use parley_shared::call::{CallScope, CallStatus, CallType};
use parley_shared::types::CallId;

use crate::codec;
use crate::database::Database;
use crate::error::{not_found_or, Result, StoreError};
use crate::models::CallSession;

impl Database {
    pub fn insert_call(&self, call: &CallSession) -> Result<()> {
        self.conn().execute(
            "INSERT INTO calls
                (id, caller_id, recipient_id, conversation_id, call_type, status,
                 started_at, ended_at, duration_secs)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                call.id.as_str(),
                call.caller_id.to_string(),
                call.scope.recipient().map(|id| id.to_string()),
                call.scope.conversation().map(|id| id.to_string()),
                call.call_type.as_str(),
                call.status.as_str(),
                codec::ts(&call.started_at),
                call.ended_at.as_ref().map(codec::ts),
                call.duration_secs,
            ],
        )?;
        Ok(())
    }

    pub fn get_call(&self, id: &CallId) -> Result<CallSession> {
        self.conn()
            .query_row(
                "SELECT id, caller_id, recipient_id, conversation_id, call_type, status,
                        started_at, ended_at, duration_secs
                 FROM calls WHERE id = ?1",
                params![id.as_str()],
                row_to_call,
            )
            .map_err(not_found_or)
    }

    /// Persist the mutable part of a call (status, end time, duration).
    pub fn update_call(&self, call: &CallSession) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE calls SET status = ?2, ended_at = ?3, duration_secs = ?4 WHERE id = ?1",
            params![
                call.id.as_str(),
                call.status.as_str(),
                call.ended_at.as_ref().map(codec::ts),
                call.duration_secs,
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

fn row_to_call(row: &rusqlite::Row<'_>) -> rusqlite::Result<CallSession> {
    let id: String = row.get(0)?;
    let scope = CallScope::from_parts(codec::opt_id(row, 2)?, codec::opt_id(row, 3)?).ok_or(
        rusqlite::Error::InvalidColumnType(2, "recipient_id".into(), rusqlite::types::Type::Null),
    )?;

    Ok(CallSession {
        id: CallId(id),
        caller_id: codec::id(row, 1)?,
        scope,
        call_type: codec::variant(row, 4, CallType::parse)?,
        status: codec::variant(row, 5, CallStatus::parse)?,
        started_at: codec::time(row, 6)?,
        ended_at: codec::opt_time(row, 7)?,
        duration_secs: row.get(8)?,
    })
}
