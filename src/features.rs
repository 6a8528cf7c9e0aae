//! The provider-level `features { ... }` block.
//!
//! Every field has a documented default. Expansion starts from
//! [`UserFeatures::default`] and only overwrites what the user actually wrote,
//! so an omitted boolean keeps its default instead of collapsing to `false`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::schema::{Attribute, Block, NestedBlock};

/// Settings derived from the `features` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserFeatures {
    /// `resource_group { ... }`
    pub resource_group: ResourceGroupFeatures,
    /// `virtual_machine { ... }`
    pub virtual_machine: VirtualMachineFeatures,
    /// `virtual_machine_scale_set { ... }`
    pub virtual_machine_scale_set: VirtualMachineScaleSetFeatures,
}

/// Behaviour of `azurestack_resource_group`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceGroupFeatures {
    /// Refuse to delete a resource group that still contains resources.
    pub prevent_deletion_if_contains_resources: bool,
}

/// Behaviour of virtual machines on delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMachineFeatures {
    /// Delete the OS disk along with the machine.
    pub delete_os_disk_on_deletion: bool,
    /// Request a graceful shutdown before deleting.
    pub graceful_shutdown: bool,
    /// Skip the shutdown and force the delete.
    pub skip_shutdown_and_force_delete: bool,
}

impl Default for VirtualMachineFeatures {
    fn default() -> Self {
        Self {
            delete_os_disk_on_deletion: true,
            graceful_shutdown: false,
            skip_shutdown_and_force_delete: false,
        }
    }
}

/// Behaviour of virtual machine scale sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMachineScaleSetFeatures {
    /// Force-delete the scale set.
    pub force_delete: bool,
    /// Roll instances when a model change requires it.
    pub roll_instances_when_required: bool,
    /// Scale to zero instances before deleting.
    pub scale_to_zero_before_deletion: bool,
}

impl Default for VirtualMachineScaleSetFeatures {
    fn default() -> Self {
        Self {
            force_delete: false,
            roll_instances_when_required: true,
            scale_to_zero_before_deletion: true,
        }
    }
}

/// Schema of the `features` block in the provider configuration.
pub fn features_schema() -> NestedBlock {
    let resource_group = Block::new().with_attribute(
        "prevent_deletion_if_contains_resources",
        Attribute::optional_bool()
            .with_description("Prevent deleting a Resource Group that still contains Resources."),
    );
    let virtual_machine = Block::new()
        .with_attribute("delete_os_disk_on_deletion", Attribute::optional_bool())
        .with_attribute("graceful_shutdown", Attribute::optional_bool())
        .with_attribute("skip_shutdown_and_force_delete", Attribute::optional_bool());
    let scale_set = Block::new()
        .with_attribute("force_delete", Attribute::optional_bool())
        .with_attribute("roll_instances_when_required", Attribute::optional_bool())
        .with_attribute("scale_to_zero_before_deletion", Attribute::optional_bool());

    NestedBlock::single(
        Block::new()
            .with_block("resource_group", NestedBlock::single(resource_group))
            .with_block("virtual_machine", NestedBlock::single(virtual_machine))
            .with_block("virtual_machine_scale_set", NestedBlock::single(scale_set)),
    )
}

/// Expand the `features` block into fully-defaulted settings.
///
/// `input` is Terraform's representation of an optional block: a list with
/// zero or one objects. A bare object is accepted as well. Anything that isn't
/// shaped like the schema is ignored.
pub fn expand_features(input: &Value) -> UserFeatures {
    let mut features = UserFeatures::default();

    let Some(block) = first_block(input) else {
        return features;
    };

    if let Some(rg) = block.get("resource_group").and_then(first_block) {
        set_bool(
            rg,
            "prevent_deletion_if_contains_resources",
            &mut features.resource_group.prevent_deletion_if_contains_resources,
        );
    }

    if let Some(vm) = block.get("virtual_machine").and_then(first_block) {
        let target = &mut features.virtual_machine;
        set_bool(vm, "delete_os_disk_on_deletion", &mut target.delete_os_disk_on_deletion);
        set_bool(vm, "graceful_shutdown", &mut target.graceful_shutdown);
        set_bool(
            vm,
            "skip_shutdown_and_force_delete",
            &mut target.skip_shutdown_and_force_delete,
        );
    }

    if let Some(vmss) = block.get("virtual_machine_scale_set").and_then(first_block) {
        let target = &mut features.virtual_machine_scale_set;
        set_bool(vmss, "force_delete", &mut target.force_delete);
        set_bool(
            vmss,
            "roll_instances_when_required",
            &mut target.roll_instances_when_required,
        );
        set_bool(
            vmss,
            "scale_to_zero_before_deletion",
            &mut target.scale_to_zero_before_deletion,
        );
    }

    features
}

/// The inverse of [`expand_features`], in the list-of-objects shape.
pub fn flatten_features(features: &UserFeatures) -> Value {
    let rg = &features.resource_group;
    let vm = &features.virtual_machine;
    let vmss = &features.virtual_machine_scale_set;
    json!([{
        "resource_group": [{
            "prevent_deletion_if_contains_resources": rg.prevent_deletion_if_contains_resources,
        }],
        "virtual_machine": [{
            "delete_os_disk_on_deletion": vm.delete_os_disk_on_deletion,
            "graceful_shutdown": vm.graceful_shutdown,
            "skip_shutdown_and_force_delete": vm.skip_shutdown_and_force_delete,
        }],
        "virtual_machine_scale_set": [{
            "force_delete": vmss.force_delete,
            "roll_instances_when_required": vmss.roll_instances_when_required,
            "scale_to_zero_before_deletion": vmss.scale_to_zero_before_deletion,
        }],
    }])
}

fn first_block(value: &Value) -> Option<&Map<String, Value>> {
    match value {
        Value::Array(items) => items.first().and_then(Value::as_object),
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn set_bool(block: &Map<String, Value>, key: &str, target: &mut bool) {
    if let Some(v) = block.get(key).and_then(Value::as_bool) {
        *target = v;
    }
}
