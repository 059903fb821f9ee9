// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::{ApplicationDescription, ApplicationWithTool, NameAndVersion};

#[async_trait]
/// Application/tool catalog lookup.
pub trait ApplicationCatalogPort: Send + Sync {
    async fn find_application(
        &self,
        application: &NameAndVersion,
    ) -> AppResult<Option<ApplicationWithTool>>;

    async fn list_applications(&self) -> AppResult<Vec<ApplicationDescription>>;
}
