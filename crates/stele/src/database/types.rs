// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use crate::database::query_guard::GuardViolation;
use std::time::Duration;
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseError {
    ConnectionFailed(String),
    QueryFailed(String),
    Refused(GuardViolation),
    Timeout(Duration),
    Configuration(String),
}
impl std::fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseError::ConnectionFailed(msg) => write!(f, "Connection failed: {msg}"),
            DatabaseError::QueryFailed(msg) => write!(f, "Query failed: {msg}"),
            DatabaseError::Refused(violation) => write!(f, "Execution refused: {violation}"),
            DatabaseError::Timeout(after) => {
                write!(f, "Query timed out after {}s", after.as_secs_f32())
            }
            DatabaseError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}
impl std::error::Error for DatabaseError {}
impl From<GuardViolation> for DatabaseError {
    fn from(violation: GuardViolation) -> Self {
        DatabaseError::Refused(violation)
    }
}
impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(e) => DatabaseError::Configuration(e.to_string()),
            sqlx::Error::Io(e) => DatabaseError::ConnectionFailed(e.to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                DatabaseError::ConnectionFailed(err.to_string())
            }
            other => DatabaseError::QueryFailed(other.to_string()),
        }
    }
}
pub type DatabaseResult<T> = Result<T, DatabaseError>;
