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

pub mod connection;
pub mod executor;
pub mod query_guard;
pub mod query_validator;
pub mod sanitize;
pub mod schema_analyser;
pub mod types;
pub use connection::{Dataset, SqliteDataset};
pub use executor::QueryExecutor;
pub use query_guard::{GuardViolation, ReadOnlyGuard, FORBIDDEN_KEYWORDS};
pub use query_validator::{extract_select_statement, GateVerdict, SafetyGate};
pub use sanitize::{clean_text, sanitize_table};
pub use schema_analyser::SchemaAnalyser;
pub use types::{DatabaseError, DatabaseResult};
