use crate::resource::Format;

#[derive(Debug, thiserror::Error)]
pub enum FrameGraphError {
    #[error("{call} failed at {location} with native code {code:#x}")]
    Native {
        call: &'static str,
        location: &'static str,
        code: i64,
    },

    #[error("Device ran out of memory during {call}")]
    OutOfDeviceMemory { call: &'static str },

    #[error("Device lost during {call}: {reason}")]
    DeviceLost { call: &'static str, reason: String },

    #[error("{call} rejected by the device: {reason}")]
    Validation { call: &'static str, reason: String },

    #[error("Format {format:?} has no backend equivalent")]
    UnsupportedFormat { format: Format },

    #[error("Frame graph contains cycles")]
    CyclicDependency,

    #[error("Resource node {index} not found")]
    ResourceNodeNotFound { index: usize },

    #[error("Pass node {index} not found")]
    PassNodeNotFound { index: usize },

    #[error("Move source resource node {src} has no destination")]
    MoveSourceMissing { src: usize },

    #[error("Resource node {src} is moved more than once")]
    DuplicateMove { src: usize },

    #[error("Resource node {node} is not registered as imported or temporal")]
    ResourceNodeNotRegistered { node: usize },

    #[error("Resource node {node} has no active view")]
    ResourceNotActive { node: usize },

    #[error("Descriptor for resource node {node} was not allocated before the pass requested it")]
    DescriptorNotAllocated { node: usize },

    #[error("{heap} descriptor heap cannot provide {requested} descriptors")]
    DescriptorHeapExhausted {
        heap: &'static str,
        requested: u32,
    },

    #[error("Command list for schedule slot {order} was not recorded")]
    CommandListMissing { order: usize },

    #[error("Failed to build pass recording thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, FrameGraphError>;

/// Builds a [`FrameGraphError::Native`] tagged with the call site.
#[macro_export]
macro_rules! native_error {
    ($call:expr, $code:expr) => {
        $crate::FrameGraphError::Native {
            call: $call,
            location: concat!(file!(), ":", line!()),
            code: $code as i64,
        }
    };
}
