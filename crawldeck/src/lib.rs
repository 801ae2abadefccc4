pub mod commands;
pub mod handlers;

// Re-export commonly used handler functions for convenience
pub use handlers::{
    client_config_from_args, descriptor_from_args, load_urls_from_file, load_urls_from_source,
    parse_ids, parse_url_line,
};
