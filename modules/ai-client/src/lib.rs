pub mod error;
pub mod openai;
pub mod traits;
mod util;

pub use error::AiError;
pub use openai::OpenAi;
pub use traits::{ChatAgent, Message, MessageRole};
pub use util::{extract_json_object, truncate_chars};
