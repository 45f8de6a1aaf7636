pub mod converse;
pub mod embed;
pub mod family;
pub mod image;
pub mod invoke;
