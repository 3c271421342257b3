pub mod key;
pub mod fanin;
pub mod maintainer;
