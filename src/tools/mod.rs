pub mod invoker;
pub mod record;
pub mod registry;
pub mod schema;

pub use invoker::{Invocation, ToolInvoker};
pub use record::{truncate_chars, ToolCallRecord};
pub use registry::{qualified_name, CatalogEntry, ToolCatalog, NAME_SEPARATOR};
pub use schema::{action_format_schema_json, required_fields, validate_arguments};
