pub mod channel_publisher;
pub mod json_lines_publisher;
