// src/utils/mod.rs
pub mod phone;
