pub mod link;

pub use link::{
    ClickContext, ContentRef, Link, LinkType, LinkUpdate, LocalizedContent, NewLink,
};
