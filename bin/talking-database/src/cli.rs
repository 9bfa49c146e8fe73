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

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "talking-database")]
#[command(about = "Ask questions of a read-only SQLite dataset in plain language")]
#[command(version)]
pub struct Args {
    #[arg(long, global = true, help = "Path to a pipeline YAML configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Override the configured database URL")]
    pub database_url: Option<String>,

    #[arg(long, global = true, help = "Emit logs as JSON on stderr")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one question through the pipeline and print its events.
    Ask {
        question: String,
        #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
        format: OutputFormat,
    },
    /// Print the schema description handed to prompts.
    Schema,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Server-sent-event frames.
    Sse,
    /// One JSON object per line.
    Jsonl,
    /// Human-readable summary.
    Pretty,
}
