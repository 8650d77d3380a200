//! Shared, version-pinned protocol identifiers.
//!
//! These constants are the single source of truth for schema/version strings that
//! appear in machine-readable I/O, and for the wire protocol revision spoken to
//! the device firmware.

pub const MCULOAD_MANIFEST_SCHEMA_VERSION: &str = "mcuload.manifest@0.1.0";

pub const MCULOAD_ESTIMATE_REPORT_SCHEMA_VERSION: &str = "mcuload.estimate.report@0.1.0";
pub const MCULOAD_RESOLVE_REPORT_SCHEMA_VERSION: &str = "mcuload.resolve.report@0.1.0";
pub const MCULOAD_LOAD_REPORT_SCHEMA_VERSION: &str = "mcuload.load.report@0.1.0";

/// Revision of the request/reply encoding. Bumped whenever an opcode or a field
/// layout changes; the firmware refuses frames from a different revision.
pub const WIRE_PROTOCOL_VERSION: u8 = 1;
