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

use crate::prompts::{PromptContext, PromptTemplate};
use crate::types::LLMResult;
use async_trait::async_trait;

/// The text-generation boundary. Output is free-form and untrusted: callers
/// decode it strictly and keep a fallback for every call site.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        template: &PromptTemplate,
        variables: &PromptContext,
    ) -> LLMResult<String>;

    fn name(&self) -> &str {
        "text-generator"
    }
}
