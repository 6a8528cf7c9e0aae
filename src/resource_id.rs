//! Azure Resource Manager resource IDs.
//!
//! An ID looks like
//! `/subscriptions/{sub}/resourceGroups/{rg}/providers/{namespace}/{type}/{name}[/{type}/{name}...]`.
//! [`ResourceId`] is the generic parsed form; the typed IDs below check that an
//! ID points at one specific kind of resource.

use std::fmt;

use serde_json::Value;

use crate::error::{ProviderError, Result};
use crate::schema::Diagnostic;

/// A parsed ARM ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    /// Subscription the resource lives in.
    pub subscription_id: String,
    /// Resource group, when the resource is scoped to one.
    pub resource_group: Option<String>,
    /// Resource provider namespace, e.g. `Microsoft.Network`.
    pub provider: Option<String>,
    path: Vec<(String, String)>,
    raw: String,
}

impl ResourceId {
    /// Parse an ARM ID.
    pub fn parse(id: &str) -> Result<Self> {
        let invalid = |reason: &str| ProviderError::InvalidResourceId {
            id: id.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = id
            .strip_prefix('/')
            .ok_or_else(|| invalid("must start with a '/'"))?;
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        let segments: Vec<&str> = trimmed.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(invalid("contains an empty segment"));
        }
        if segments.len() % 2 != 0 {
            return Err(invalid("the number of segments isn't even"));
        }

        let mut subscription_id = None;
        let mut resource_group = None;
        let mut provider = None;
        let mut path: Vec<(String, String)> = Vec::new();

        for pair in segments.chunks(2) {
            let (key, value) = (pair[0], pair[1]);
            if key == "subscriptions" && subscription_id.is_none() {
                subscription_id = Some(value.to_string());
            } else if key.eq_ignore_ascii_case("resourceGroups") && resource_group.is_none() {
                resource_group = Some(value.to_string());
            } else if key == "providers" && provider.is_none() {
                provider = Some(value.to_string());
            } else {
                if path.iter().any(|(k, _)| k == key) {
                    return Err(invalid(&format!("duplicate key {key:?}")));
                }
                path.push((key.to_string(), value.to_string()));
            }
        }

        let subscription_id = subscription_id.ok_or_else(|| invalid("no subscription ID found"))?;

        Ok(Self {
            subscription_id,
            resource_group,
            provider,
            path,
            raw: id.to_string(),
        })
    }

    /// The ID this was parsed from.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Rebuild the ID in canonical casing.
    pub fn format(&self) -> String {
        let mut out = format!("/subscriptions/{}", self.subscription_id);
        if let Some(rg) = &self.resource_group {
            out.push_str(&format!("/resourceGroups/{rg}"));
        }
        if let Some(provider) = &self.provider {
            out.push_str(&format!("/providers/{provider}"));
        }
        for (key, value) in &self.path {
            out.push_str(&format!("/{key}/{value}"));
        }
        out
    }

    /// The value of a path segment, e.g. `path_value("virtualNetworks")`.
    pub fn path_value(&self, key: &str) -> Option<&str> {
        self.path
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Remove and return a path segment, failing if it is absent.
    pub fn pop(&mut self, key: &str) -> Result<String> {
        match self.path.iter().position(|(k, _)| k == key) {
            Some(index) => Ok(self.path.remove(index).1),
            None => Err(ProviderError::InvalidResourceId {
                id: self.raw.clone(),
                reason: format!("ID was missing the `{key}` element"),
            }),
        }
    }

    /// The resource group, failing if the ID isn't scoped to one.
    pub fn require_resource_group(&self) -> Result<String> {
        self.resource_group
            .clone()
            .ok_or_else(|| ProviderError::InvalidResourceId {
                id: self.raw.clone(),
                reason: "ID was missing the `resourceGroups` element".to_string(),
            })
    }

    fn expect_provider(&self, namespace: &str) -> Result<()> {
        match &self.provider {
            Some(p) if p.eq_ignore_ascii_case(namespace) => Ok(()),
            _ => Err(ProviderError::InvalidResourceId {
                id: self.raw.clone(),
                reason: format!("expected the provider namespace to be {namespace:?}"),
            }),
        }
    }

    fn expect_empty(&self) -> Result<()> {
        match self.path.first() {
            None => Ok(()),
            Some((key, _)) => Err(ProviderError::InvalidResourceId {
                id: self.raw.clone(),
                reason: format!("unexpected segment `{key}`"),
            }),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

/// Typed IDs that can render themselves back into ARM form.
pub trait ResourceIdFormatter {
    /// The ARM ID string.
    fn id(&self) -> String;
}

/// `/subscriptions/{sub}/resourceGroups/{name}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceGroupId {
    /// Subscription ID.
    pub subscription_id: String,
    /// Resource group name.
    pub resource_group: String,
}

impl ResourceGroupId {
    /// Build an ID from its parts.
    pub fn new(subscription_id: impl Into<String>, resource_group: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
        }
    }

    /// Parse and check that the ID names a resource group.
    pub fn parse(input: &str) -> Result<Self> {
        let id = ResourceId::parse(input)?;
        let resource_group = id.require_resource_group()?;
        if id.provider.is_some() {
            return Err(ProviderError::InvalidResourceId {
                id: input.to_string(),
                reason: "expected a Resource Group ID, not a nested resource".to_string(),
            });
        }
        id.expect_empty()?;
        Ok(Self {
            subscription_id: id.subscription_id,
            resource_group,
        })
    }
}

impl ResourceIdFormatter for ResourceGroupId {
    fn id(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}",
            self.subscription_id, self.resource_group
        )
    }
}

impl fmt::Display for ResourceGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Resource Group {:?} (Subscription {:?})",
            self.resource_group, self.subscription_id
        )
    }
}

/// A virtual network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualNetworkId {
    /// Subscription ID.
    pub subscription_id: String,
    /// Resource group name.
    pub resource_group: String,
    /// Virtual network name.
    pub name: String,
}

impl VirtualNetworkId {
    /// Build an ID from its parts.
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            name: name.into(),
        }
    }

    /// Parse and check that the ID names a virtual network.
    pub fn parse(input: &str) -> Result<Self> {
        let mut id = ResourceId::parse(input)?;
        id.expect_provider("Microsoft.Network")?;
        let resource_group = id.require_resource_group()?;
        let name = id.pop("virtualNetworks")?;
        id.expect_empty()?;
        Ok(Self {
            subscription_id: id.subscription_id,
            resource_group,
            name,
        })
    }
}

impl ResourceIdFormatter for VirtualNetworkId {
    fn id(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/virtualNetworks/{}",
            self.subscription_id, self.resource_group, self.name
        )
    }
}

impl fmt::Display for VirtualNetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Virtual Network {:?} (Resource Group {:?})",
            self.name, self.resource_group
        )
    }
}

/// A subnet within a virtual network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetId {
    /// Subscription ID.
    pub subscription_id: String,
    /// Resource group name.
    pub resource_group: String,
    /// Parent virtual network name.
    pub virtual_network_name: String,
    /// Subnet name.
    pub name: String,
}

impl SubnetId {
    /// Build an ID from its parts.
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        virtual_network_name: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            virtual_network_name: virtual_network_name.into(),
            name: name.into(),
        }
    }

    /// Parse and check that the ID names a subnet.
    pub fn parse(input: &str) -> Result<Self> {
        let mut id = ResourceId::parse(input)?;
        id.expect_provider("Microsoft.Network")?;
        let resource_group = id.require_resource_group()?;
        let virtual_network_name = id.pop("virtualNetworks")?;
        let name = id.pop("subnets")?;
        id.expect_empty()?;
        Ok(Self {
            subscription_id: id.subscription_id,
            resource_group,
            virtual_network_name,
            name,
        })
    }

    /// The parent virtual network.
    pub fn virtual_network(&self) -> VirtualNetworkId {
        VirtualNetworkId::new(
            &self.subscription_id,
            &self.resource_group,
            &self.virtual_network_name,
        )
    }
}

impl ResourceIdFormatter for SubnetId {
    fn id(&self) -> String {
        format!("{}/subnets/{}", self.virtual_network().id(), self.name)
    }
}

impl fmt::Display for SubnetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Subnet {:?} (Virtual Network {:?} / Resource Group {:?})",
            self.name, self.virtual_network_name, self.resource_group
        )
    }
}

/// A network security group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSecurityGroupId {
    /// Subscription ID.
    pub subscription_id: String,
    /// Resource group name.
    pub resource_group: String,
    /// Network security group name.
    pub name: String,
}

impl NetworkSecurityGroupId {
    /// Build an ID from its parts.
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            name: name.into(),
        }
    }

    /// Parse and check that the ID names a network security group.
    pub fn parse(input: &str) -> Result<Self> {
        let mut id = ResourceId::parse(input)?;
        id.expect_provider("Microsoft.Network")?;
        let resource_group = id.require_resource_group()?;
        let name = id.pop("networkSecurityGroups")?;
        id.expect_empty()?;
        Ok(Self {
            subscription_id: id.subscription_id,
            resource_group,
            name,
        })
    }
}

impl ResourceIdFormatter for NetworkSecurityGroupId {
    fn id(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/networkSecurityGroups/{}",
            self.subscription_id, self.resource_group, self.name
        )
    }
}

impl fmt::Display for NetworkSecurityGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Network Security Group {:?} (Resource Group {:?})",
            self.name, self.resource_group
        )
    }
}

const POLICY_ASSIGNMENT_SEGMENT: &str = "/providers/Microsoft.Authorization/policyAssignments/";

/// A policy assignment. The scope may be any ARM ID (subscription, resource
/// group, resource or management group).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyAssignmentId {
    /// The scope the assignment applies to.
    pub scope: String,
    /// Assignment name.
    pub name: String,
}

impl PolicyAssignmentId {
    /// Build an ID from its parts.
    pub fn new(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            name: name.into(),
        }
    }

    /// Parse `{scope}/providers/Microsoft.Authorization/policyAssignments/{name}`.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| ProviderError::InvalidResourceId {
            id: input.to_string(),
            reason: reason.to_string(),
        };

        let lowered = input.to_ascii_lowercase();
        let index = lowered
            .rfind(&POLICY_ASSIGNMENT_SEGMENT.to_ascii_lowercase())
            .ok_or_else(|| invalid("expected a Policy Assignment ID"))?;

        let scope = &input[..index];
        let name = &input[index + POLICY_ASSIGNMENT_SEGMENT.len()..];
        if !scope.starts_with('/') {
            return Err(invalid("the scope must be a resource ID"));
        }
        if name.is_empty() || name.contains('/') {
            return Err(invalid("the assignment name is empty or malformed"));
        }

        Ok(Self::new(scope, name))
    }
}

impl ResourceIdFormatter for PolicyAssignmentId {
    fn id(&self) -> String {
        format!("{}{}{}", self.scope, POLICY_ASSIGNMENT_SEGMENT, self.name)
    }
}

impl fmt::Display for PolicyAssignmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Policy Assignment {:?} (Scope {:?})", self.name, self.scope)
    }
}

/// Value validator: the string must be a parseable ARM ID.
pub fn validate_resource_id(value: &Value, path: &str) -> Vec<Diagnostic> {
    let Some(v) = value.as_str() else {
        return vec![Diagnostic::error(format!("expected type of {path:?} to be string")).with_attribute(path)];
    };
    match ResourceId::parse(v) {
        Ok(_) => Vec::new(),
        Err(err) => vec![
            Diagnostic::error(format!("Can not parse {path:?} as a resource id"))
                .with_detail(err.to_string())
                .with_attribute(path),
        ],
    }
}

/// Value validator: an ARM ID or the empty string.
pub fn validate_resource_id_or_empty(value: &Value, path: &str) -> Vec<Diagnostic> {
    if value.as_str() == Some("") {
        return Vec::new();
    }
    validate_resource_id(value, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SUBNET: &str = "/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/acctest-rg/providers/Microsoft.Network/virtualNetworks/acctest-vnet/subnets/internal";

    #[test]
    fn test_parse_generic() {
        let id = ResourceId::parse(SUBNET).unwrap();
        assert_eq!(id.subscription_id, "00000000-0000-0000-0000-000000000000");
        assert_eq!(id.resource_group.as_deref(), Some("acctest-rg"));
        assert_eq!(id.provider.as_deref(), Some("Microsoft.Network"));
        assert_eq!(id.path_value("virtualNetworks"), Some("acctest-vnet"));
        assert_eq!(id.path_value("subnets"), Some("internal"));
        assert_eq!(id.format(), SUBNET);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(ResourceId::parse("subscriptions/123").is_err());
        assert!(ResourceId::parse("/subscriptions/123/resourceGroups").is_err());
        assert!(ResourceId::parse("/subscriptions//resourceGroups/rg").is_err());
        assert!(ResourceId::parse("/resourceGroups/rg").is_err());
        assert!(ResourceId::parse(
            "/subscriptions/1/resourceGroups/rg/providers/Microsoft.Network/subnets/a/subnets/b"
        )
        .is_err());
    }

    #[test]
    fn test_lowercase_resource_groups_segment() {
        let id = ResourceGroupId::parse("/subscriptions/123/resourcegroups/example").unwrap();
        assert_eq!(id.resource_group, "example");
        assert_eq!(id.id(), "/subscriptions/123/resourceGroups/example");
    }

    #[test]
    fn test_resource_group_id_rejects_nested() {
        let err = ResourceGroupId::parse(SUBNET).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResourceId { .. }));
    }

    #[test]
    fn test_subnet_id() {
        let id = SubnetId::parse(SUBNET).unwrap();
        assert_eq!(id.virtual_network_name, "acctest-vnet");
        assert_eq!(id.name, "internal");
        assert_eq!(id.id(), SUBNET);
        assert_eq!(id.virtual_network().name, "acctest-vnet");

        assert!(SubnetId::parse(&id.virtual_network().id()).is_err());
    }

    #[test]
    fn test_network_security_group_id() {
        let id = NetworkSecurityGroupId::new("123", "rg", "web-nsg");
        let parsed = NetworkSecurityGroupId::parse(&id.id()).unwrap();
        assert_eq!(parsed, id);
        assert!(NetworkSecurityGroupId::parse(SUBNET).is_err());
        assert!(NetworkSecurityGroupId::parse(
            "/subscriptions/123/resourceGroups/rg/providers/Microsoft.Compute/networkSecurityGroups/x"
        )
        .is_err());
    }

    #[test]
    fn test_policy_assignment_id() {
        let id = PolicyAssignmentId::parse(
            "/subscriptions/123/resourceGroups/rg/providers/Microsoft.Authorization/policyAssignments/audit-vms",
        )
        .unwrap();
        assert_eq!(id.scope, "/subscriptions/123/resourceGroups/rg");
        assert_eq!(id.name, "audit-vms");

        let mg = PolicyAssignmentId::new(
            "/providers/Microsoft.Management/managementGroups/root",
            "deny-public-ip",
        );
        assert_eq!(PolicyAssignmentId::parse(&mg.id()).unwrap(), mg);

        assert!(PolicyAssignmentId::parse("/subscriptions/123").is_err());
        assert!(PolicyAssignmentId::parse(
            "/subscriptions/123/providers/Microsoft.Authorization/policyAssignments/"
        )
        .is_err());
    }

    #[test]
    fn test_validators() {
        assert!(validate_resource_id(&json!(SUBNET), "subnet_id").is_empty());
        assert_eq!(validate_resource_id(&json!("nope"), "subnet_id").len(), 1);
        assert_eq!(validate_resource_id(&json!(""), "subnet_id").len(), 1);
        assert_eq!(validate_resource_id(&json!(5), "subnet_id").len(), 1);

        assert!(validate_resource_id_or_empty(&json!(""), "subnet_id").is_empty());
        assert_eq!(validate_resource_id_or_empty(&json!("nope"), "subnet_id").len(), 1);
    }
}
