pub mod catalog;
pub mod gc;
pub mod header;
pub mod index;
pub mod logging;
pub mod table;
pub mod tile_group;
pub mod verification;

#[cfg(test)]
mod tests;
