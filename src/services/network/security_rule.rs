//! The `security_rule` block shared by the network security group resource
//! and data source.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Result;
use crate::schema::{Attribute, AttributeFlags, AttributeType, Block, Diagnostic, NestedBlock};
use crate::validate::string_in;

/// One inbound or outbound rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityRule {
    /// Rule name, unique within the group.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// `Tcp`, `Udp`, `Icmp` or `*`.
    pub protocol: String,
    /// Single port, range or `*`.
    pub source_port_range: String,
    /// Used instead of `source_port_range` for several ranges.
    pub source_port_ranges: Vec<String>,
    /// Single port, range or `*`.
    pub destination_port_range: String,
    /// Used instead of `destination_port_range` for several ranges.
    pub destination_port_ranges: Vec<String>,
    /// CIDR, IP address or service tag.
    pub source_address_prefix: String,
    /// Used instead of `source_address_prefix` for several prefixes.
    pub source_address_prefixes: Vec<String>,
    /// CIDR, IP address or service tag.
    pub destination_address_prefix: String,
    /// Used instead of `destination_address_prefix` for several prefixes.
    pub destination_address_prefixes: Vec<String>,
    /// `Allow` or `Deny`.
    pub access: String,
    /// 100 to 4096, lower wins.
    pub priority: i64,
    /// `Inbound` or `Outbound`.
    pub direction: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SecurityRuleProperties {
    #[serde(skip_serializing_if = "String::is_empty")]
    description: String,
    protocol: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    source_port_range: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    source_port_ranges: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    destination_port_range: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    destination_port_ranges: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    source_address_prefix: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    source_address_prefixes: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    destination_address_prefix: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    destination_address_prefixes: Vec<String>,
    access: String,
    priority: i64,
    direction: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ArmSecurityRule {
    name: String,
    properties: SecurityRuleProperties,
}

fn validate_priority(value: &Value, path: &str) -> Vec<Diagnostic> {
    match value.as_i64() {
        Some(p) if (100..=4096).contains(&p) => Vec::new(),
        _ => vec![Diagnostic::error(format!("expected {path} to be in the range (100 - 4096), got {value}"))
            .with_attribute(path)],
    }
}

fn string_list(flags: AttributeFlags) -> Attribute {
    Attribute::new(AttributeType::list(AttributeType::String), flags)
}

/// The configurable `security_rule` block.
pub(crate) fn schema() -> NestedBlock {
    NestedBlock::list(
        Block::new()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("description", Attribute::optional_string())
            .with_attribute(
                "protocol",
                Attribute::required_string().with_validator(|v, p| string_in(v, p, &["Tcp", "Udp", "Icmp", "*"])),
            )
            .with_attribute("source_port_range", Attribute::optional_string())
            .with_attribute("source_port_ranges", string_list(AttributeFlags::optional()))
            .with_attribute("destination_port_range", Attribute::optional_string())
            .with_attribute("destination_port_ranges", string_list(AttributeFlags::optional()))
            .with_attribute("source_address_prefix", Attribute::optional_string())
            .with_attribute("source_address_prefixes", string_list(AttributeFlags::optional()))
            .with_attribute("destination_address_prefix", Attribute::optional_string())
            .with_attribute("destination_address_prefixes", string_list(AttributeFlags::optional()))
            .with_attribute(
                "access",
                Attribute::required_string().with_validator(|v, p| string_in(v, p, &["Allow", "Deny"])),
            )
            .with_attribute(
                "priority",
                Attribute::new(AttributeType::Int64, AttributeFlags::required()).with_validator(validate_priority),
            )
            .with_attribute(
                "direction",
                Attribute::required_string().with_validator(|v, p| string_in(v, p, &["Inbound", "Outbound"])),
            ),
    )
}

/// The read-only `security_rule` block of the data source.
pub(crate) fn computed_schema() -> NestedBlock {
    let string = Attribute::computed_string;
    let list = || string_list(AttributeFlags::computed());
    NestedBlock::list(
        Block::new()
            .with_attribute("name", string())
            .with_attribute("description", string())
            .with_attribute("protocol", string())
            .with_attribute("source_port_range", string())
            .with_attribute("source_port_ranges", list())
            .with_attribute("destination_port_range", string())
            .with_attribute("destination_port_ranges", list())
            .with_attribute("source_address_prefix", string())
            .with_attribute("source_address_prefixes", list())
            .with_attribute("destination_address_prefix", string())
            .with_attribute("destination_address_prefixes", list())
            .with_attribute("access", string())
            .with_attribute("priority", Attribute::new(AttributeType::Int64, AttributeFlags::computed()))
            .with_attribute("direction", string()),
    )
}

/// Rules in the `properties.securityRules` shape.
pub(crate) fn expand(rules: &[SecurityRule]) -> Result<Value> {
    let mut out = Vec::with_capacity(rules.len());
    for rule in rules {
        let properties = SecurityRuleProperties {
            description: rule.description.clone(),
            protocol: rule.protocol.clone(),
            source_port_range: rule.source_port_range.clone(),
            source_port_ranges: rule.source_port_ranges.clone(),
            destination_port_range: rule.destination_port_range.clone(),
            destination_port_ranges: rule.destination_port_ranges.clone(),
            source_address_prefix: rule.source_address_prefix.clone(),
            source_address_prefixes: rule.source_address_prefixes.clone(),
            destination_address_prefix: rule.destination_address_prefix.clone(),
            destination_address_prefixes: rule.destination_address_prefixes.clone(),
            access: rule.access.clone(),
            priority: rule.priority,
            direction: rule.direction.clone(),
        };
        out.push(json!({
            "name": rule.name,
            "properties": serde_json::to_value(properties)?,
        }));
    }
    Ok(Value::Array(out))
}

/// Rules from `properties.securityRules`. A missing list is empty.
pub(crate) fn flatten(input: Option<&Value>) -> Result<Vec<SecurityRule>> {
    let Some(input) = input.filter(|v| !v.is_null()) else {
        return Ok(Vec::new());
    };
    let rules: Vec<ArmSecurityRule> = serde_json::from_value(input.clone())?;
    Ok(rules
        .into_iter()
        .map(|r| {
            let p = r.properties;
            SecurityRule {
                name: r.name,
                description: p.description,
                protocol: p.protocol,
                source_port_range: p.source_port_range,
                source_port_ranges: p.source_port_ranges,
                destination_port_range: p.destination_port_range,
                destination_port_ranges: p.destination_port_ranges,
                source_address_prefix: p.source_address_prefix,
                source_address_prefixes: p.source_address_prefixes,
                destination_address_prefix: p.destination_address_prefix,
                destination_address_prefixes: p.destination_address_prefixes,
                access: p.access,
                priority: p.priority,
                direction: p.direction,
            }
        })
        .collect())
}
