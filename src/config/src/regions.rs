// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::Result;
use crate::errors::Error;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Queries the identity service for the projects named after a region.
#[async_trait::async_trait]
pub(crate) trait ProjectLookup: Send + Sync {
    /// Returns `(project name, project id)` pairs.
    async fn projects(&self, region: &str) -> Result<Vec<(String, String)>>;
}

/// Maps region names to project ids.
///
/// Entries are never evicted or overwritten. The lock is held for the whole
/// check, query, and populate sequence, so concurrent misses issue a single
/// remote query.
#[derive(Debug, Default)]
pub(crate) struct RegionProjects {
    index: Mutex<HashMap<String, String>>,
}

impl RegionProjects {
    pub(crate) async fn seed(&self, region: &str, project_id: &str) {
        let mut index = self.index.lock().await;
        index
            .entry(region.to_string())
            .or_insert_with(|| project_id.to_string());
        tracing::debug!("init region and project map: {index:?}");
    }

    pub(crate) async fn resolve(&self, region: &str, lookup: &dyn ProjectLookup) -> Result<String> {
        let mut index = self.index.lock().await;
        if let Some(id) = index.get(region) {
            return Ok(id.clone());
        }

        tracing::debug!("load project id for region: {region}");
        let projects = lookup.projects(region).await?;
        if projects.is_empty() {
            return Err(Error::not_found(format!(
                "wrong name or no access to the region: {region}"
            )));
        }
        for (name, id) in projects {
            tracing::debug!("add {name}/{id} to region and project map");
            index.entry(name).or_insert(id);
        }
        index.get(region).cloned().ok_or_else(|| {
            Error::not_found(format!("wrong name or no access to the region: {region}"))
        })
    }
}
