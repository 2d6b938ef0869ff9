//! API request/response models.

pub mod images;
