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

//! Every service family is addressed as
//! `https://{name}.{region}.{cloud}/{version}/{project_id}/{resource_base}/`.
//! Global services drop the region from the host, and some services drop
//! the version, the project id, or the resource base.

use std::collections::HashMap;
use std::sync::LazyLock;

/// Whether a service has one endpoint per region or a single global one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    Regional,
    Global,
}

/// The addressing rules for one service family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceCatalogEntry {
    name: &'static str,
    version: &'static str,
    scope: Scope,
    admin: bool,
    without_project_id: bool,
    resource_base: &'static str,
}

impl ServiceCatalogEntry {
    const fn regional(name: &'static str, version: &'static str) -> Self {
        Self {
            name,
            version,
            scope: Scope::Regional,
            admin: false,
            without_project_id: false,
            resource_base: "",
        }
    }

    const fn global(name: &'static str, version: &'static str) -> Self {
        Self {
            scope: Scope::Global,
            ..Self::regional(name, version)
        }
    }

    const fn as_admin(self) -> Self {
        Self {
            admin: true,
            ..self
        }
    }

    const fn no_project_id(self) -> Self {
        Self {
            without_project_id: true,
            ..self
        }
    }

    const fn with_resource_base(self, resource_base: &'static str) -> Self {
        Self {
            resource_base,
            ..self
        }
    }

    /// The host name prefix of the service endpoint.
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn version(&self) -> Option<&str> {
        Some(self.version).filter(|v| !v.is_empty())
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Admin services use the domain-scoped identity client.
    pub fn admin(&self) -> bool {
        self.admin
    }

    pub fn without_project_id(&self) -> bool {
        self.without_project_id
    }

    pub fn resource_base(&self) -> Option<&str> {
        Some(self.resource_base).filter(|v| !v.is_empty())
    }

    /// Returns the service endpoint for `region`.
    ///
    /// Global services use a single endpoint unless `region_client` forces
    /// per-region endpoints.
    pub fn endpoint(&self, region: &str, cloud: &str, region_client: bool) -> String {
        match (self.scope, region_client) {
            (Scope::Global, false) => format!("https://{}.{cloud}/", self.name),
            _ => format!("https://{}.{region}.{cloud}/", self.name),
        }
    }

    /// Appends the version, project id, and resource base segments to
    /// `endpoint`. Each segment is `/`-terminated.
    pub fn resource_base_url(&self, endpoint: &str, project_id: &str) -> String {
        let mut url = endpoint.to_string();
        if !url.ends_with('/') {
            url.push('/');
        }
        if let Some(v) = self.version() {
            url.push_str(v);
            url.push('/');
        }
        if !self.without_project_id && !project_id.is_empty() {
            url.push_str(project_id);
            url.push('/');
        }
        if let Some(rb) = self.resource_base() {
            url.push_str(rb);
            url.push('/');
        }
        url
    }
}

type Entry = ServiceCatalogEntry;

static CATALOG: LazyLock<HashMap<&'static str, ServiceCatalogEntry>> = LazyLock::new(|| {
    HashMap::from([
        // Identity, enterprise projects, billing
        ("iam", Entry::global("iam", "v3.0").as_admin().no_project_id()),
        ("identity", Entry::global("iam", "v3").as_admin().no_project_id()),
        ("iam_no_version", Entry::global("iam", "").as_admin().no_project_id()),
        ("cdn", Entry::global("cdn", "v1.0").as_admin().no_project_id()),
        (
            "eps",
            Entry::global("eps", "v1.0")
                .as_admin()
                .no_project_id()
                .with_resource_base("enterprise-projects"),
        ),
        ("bss", Entry::global("bss", "v1.0").as_admin()),
        ("bssv2", Entry::global("bss", "v2").as_admin().no_project_id()),
        (
            "rms",
            Entry::global("rms", "v1")
                .as_admin()
                .no_project_id()
                .with_resource_base("resource-manager"),
        ),
        // Compute
        ("ecs", Entry::regional("ecs", "v1")),
        ("ecsv11", Entry::regional("ecs", "v1.1")),
        ("ecsv21", Entry::regional("ecs", "v2.1")),
        ("autoscaling", Entry::regional("as", "autoscaling-api/v1")),
        ("ims", Entry::regional("ims", "v2").no_project_id()),
        ("bms", Entry::regional("bms", "v1")),
        ("fgs", Entry::regional("functiongraph", "v2")),
        ("swr", Entry::regional("swr-api", "v2").no_project_id()),
        // Containers
        ("cce", Entry::regional("cce", "api/v3/projects")),
        ("ccev1", Entry::regional("cce", "api/v1").no_project_id()),
        ("cce_addon", Entry::regional("cce", "api/v3").no_project_id()),
        ("aom", Entry::regional("aom", "svcstg/icmgr/v1")),
        ("cci", Entry::regional("cci", "apis/networking.cci.io/v1beta1").no_project_id()),
        ("cciv1_bata", Entry::regional("cci", "api/v1").no_project_id()),
        // Storage
        ("evs", Entry::regional("evs", "v2")),
        ("evsv21", Entry::regional("evs", "v2.1")),
        ("sfs", Entry::regional("sfs", "v2")),
        ("sfs-turbo", Entry::regional("sfs-turbo", "v1")),
        ("cbr", Entry::regional("cbr", "v3")),
        ("csbs", Entry::regional("csbs", "v1")),
        ("vbs", Entry::regional("vbs", "v2")),
        // Networking
        ("vpc", Entry::regional("vpc", "v1")),
        ("networkv2", Entry::regional("vpc", "v2.0").no_project_id()),
        ("vpcv3", Entry::regional("vpc", "v3")),
        ("security_group", Entry::regional("vpc", "v1")),
        ("vpcep", Entry::regional("vpcep", "v1")),
        ("nat", Entry::regional("nat", "v2")),
        ("elb", Entry::regional("elb", "v2")),
        ("elbv2", Entry::regional("elb", "v2.0").no_project_id()),
        ("elbv3", Entry::regional("elb", "v3")),
        ("dns", Entry::global("dns", "v2").no_project_id()),
        ("dns_region", Entry::regional("dns", "v2").no_project_id()),
        ("cc", Entry::global("cc", "v3").as_admin().no_project_id()),
        // Management
        ("cts", Entry::regional("cts", "v1.0")),
        ("ces", Entry::regional("ces", "V1.0")),
        ("lts", Entry::regional("lts", "v2")),
        ("smn", Entry::regional("smn", "v2").with_resource_base("notifications")),
        // Security
        ("anti-ddos", Entry::regional("antiddos", "v1")),
        ("kms", Entry::regional("kms", "v1.0")),
        ("kmsv1", Entry::regional("kms", "v1")),
        ("waf", Entry::regional("waf", "v1")),
        ("waf-dedicated", Entry::regional("waf", "v1").with_resource_base("premium-waf")),
        ("ccm", Entry::global("scm", "v3").as_admin().no_project_id()),
        ("scm", Entry::regional("scm", "v3").no_project_id()),
        // Analytics
        ("mrs", Entry::regional("mrs", "v1.1")),
        ("mrsv2", Entry::regional("mrs", "v2")),
        ("dws", Entry::regional("dws", "v1.0")),
        ("dwsv2", Entry::regional("dws", "v2")),
        ("dli", Entry::regional("dli", "v1.0")),
        ("dliv2", Entry::regional("dli", "v2.0")),
        ("dis", Entry::regional("dis", "v2")),
        ("disv3", Entry::regional("dis", "v3")),
        ("css", Entry::regional("css", "v1.0")),
        ("cs", Entry::regional("cs", "v1.0")),
        ("cloudtable", Entry::regional("cloudtable", "v2")),
        ("cdm", Entry::regional("cdm", "v1.1")),
        ("ges", Entry::regional("ges", "v1.0")),
        ("modelarts", Entry::regional("modelarts", "v1")),
        ("modelartsv2", Entry::regional("modelarts", "v2")),
        ("oms", Entry::regional("oms", "v1")),
        ("mls", Entry::regional("mls", "v1.0")),
        // Application middleware
        ("apig", Entry::regional("apig", "v1.0").no_project_id().with_resource_base("apigw")),
        ("apigv2", Entry::regional("apig", "v2")),
        ("bcs", Entry::regional("bcs", "v2")),
        ("dcsv1", Entry::regional("dcs", "v1.0")),
        ("dcs", Entry::regional("dcs", "v2")),
        ("dms", Entry::regional("dms", "v1.0")),
        ("dmsv2", Entry::regional("dms", "v2")),
        // Databases
        ("rdsv1", Entry::regional("rds", "rds/v1")),
        ("rds", Entry::regional("rds", "v3")),
        ("dds", Entry::regional("dds", "v3")),
        ("geminidb", Entry::regional("gaussdb-nosql", "v3")),
        ("geminidbv31", Entry::regional("gaussdb-nosql", "v3.1")),
        ("opengauss", Entry::regional("gaussdb-opengauss", "v3")),
        ("gaussdb", Entry::regional("gaussdb", "mysql/v3")),
        ("drs", Entry::regional("drs", "v3")),
        // Edge
        ("iec", Entry::global("iec", "v1").no_project_id()),
    ])
});

/// Returns the catalog entry for a logical service name.
pub fn lookup(service: &str) -> Option<&'static ServiceCatalogEntry> {
    CATALOG.get(service)
}
