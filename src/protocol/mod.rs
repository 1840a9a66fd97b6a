//! Wire protocol
//!
//! The feed is plain UTF-8 text carrying `<key|value>` records with no
//! framing beyond the delimiter characters:
//!
//! ```text
//! <price|10.5><volume|1200>  noise is ignored  <bid|10.4>
//! ```

pub mod constants;
pub mod record;
pub mod scanner;

pub use record::Record;
pub use scanner::RecordScanner;
