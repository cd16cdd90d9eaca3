//! DNS identities under which the webhook `Service` is reachable from inside the cluster

use std::fmt::Display;

/// Ordered set of DNS names that the webhook certificate is issued for.
///
/// The first entry is used as the certificate's Common Name, all entries (including the first)
/// become Subject Alternative Names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySet {
    names: Vec<String>,
}

impl IdentitySet {
    /// Derives the identities of `service_name` in `namespace`:
    ///
    /// 1. `<service>.<namespace>.svc` (Common Name)
    /// 2. `<service>`
    /// 3. `<service>.<namespace>`
    /// 4. `<service>.<namespace>.svc.cluster.local`
    pub fn for_service(service_name: &str, namespace: &str) -> Self {
        let namespaced_service_name = format!("{service_name}.{namespace}");
        Self {
            names: vec![
                format!("{namespaced_service_name}.svc"),
                service_name.to_string(),
                namespaced_service_name.clone(),
                format!("{namespaced_service_name}.svc.cluster.local"),
            ],
        }
    }

    pub fn common_name(&self) -> &str {
        &self.names[0]
    }

    pub fn subject_alt_names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl Display for IdentitySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.names.join(","))
    }
}
