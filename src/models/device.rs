//! Loaded model handles and device placement

use std::any::Any;
use std::fmt;
use std::sync::RwLock;

/// Compute device a component lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    #[default]
    Cpu,
    Cuda(u32),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Cuda(rank) => write!(f, "cuda:{rank}"),
        }
    }
}

/// Capability of being moved to another device in place
pub trait DevicePlaceable: Send + Sync {
    fn device(&self) -> Device;

    /// Move to `device`. Must be a no-op when already there.
    fn to_device(&self, device: Device);
}

/// One object inside a loaded model
pub trait ModelComponent: Send + Sync + fmt::Debug {
    /// Short human-readable kind, e.g. "tokenizer"
    fn kind(&self) -> &'static str;

    /// Components that can change device opt in by returning themselves
    fn as_placeable(&self) -> Option<&dyn DevicePlaceable> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// A loaded model: one object or a fixed tuple of heterogeneous objects
#[derive(Debug)]
pub enum LoadedModel {
    Single(Box<dyn ModelComponent>),
    Tuple(Vec<Box<dyn ModelComponent>>),
}

impl LoadedModel {
    pub fn single(component: impl ModelComponent + 'static) -> Self {
        Self::Single(Box::new(component))
    }

    /// Components in declaration order
    pub fn components(&self) -> impl Iterator<Item = &(dyn ModelComponent + 'static)> {
        let slice: &[Box<dyn ModelComponent>] = match self {
            Self::Single(component) => std::slice::from_ref(component),
            Self::Tuple(components) => components,
        };
        slice.iter().map(|c| c.as_ref())
    }

    /// First component of concrete type `T`
    pub fn downcast<T: 'static>(&self) -> Option<&T> {
        self.components().find_map(|c| c.as_any().downcast_ref::<T>())
    }
}

/// Move every placeable component of `model` to `cuda:<rank>`
///
/// Components without the capability are skipped. Placing twice on the same
/// rank leaves the model unchanged.
pub fn place(model: &LoadedModel, rank: u32) {
    let target = Device::Cuda(rank);
    for component in model.components() {
        let Some(placeable) = component.as_placeable() else {
            continue;
        };
        if placeable.device() == target {
            tracing::debug!(component = component.kind(), device = %target, "Already on device");
            continue;
        }
        tracing::info!(component = component.kind(), device = %target, "Moving component to device");
        placeable.to_device(target);
    }
}

/// Device slot for component types that opt into placement
#[derive(Debug, Default)]
pub struct DeviceSlot(RwLock<Device>);

impl DeviceSlot {
    pub fn get(&self) -> Device {
        *self.0.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, device: Device) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = device;
    }
}
