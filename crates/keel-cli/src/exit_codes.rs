//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

/// Success - operation completed without errors
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Validation error - bad release name, options or values
pub const VALIDATION_ERROR: i32 = 2;

/// Template error - rendering or manifest parsing failed
pub const TEMPLATE_ERROR: i32 = 3;

/// Chart error - invalid chart structure or Chart.yaml
pub const CHART_ERROR: i32 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// The release or version does not exist
pub const NOT_FOUND: i32 = 6;

/// Name taken, operation in progress, or resource owned by someone else
pub const CONFLICT: i32 = 7;

/// Cluster rejected or did not finish the operation
pub const CLUSTER_ERROR: i32 = 8;

/// Usage error - invalid arguments or options (following sysexits.h convention)
pub const USAGE_ERROR: i32 = 64;

/// Interrupted (128 + SIGINT)
pub const CANCELLED: i32 = 130;
