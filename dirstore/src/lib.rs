// Directory entries are stored as compound directory items: sorted arrays
// of compressed entry ids with the entry targets (and long names) packed
// behind them, inside fixed-size leaf nodes.
//
// System components:
//  - Key format and id compression
//  - Item codec
//  - Leaf nodes, coords and the node store
//  - Seals, the versioned shortcut past tree searches
//  - Directory operations and image files

pub mod config;
pub mod storage;

#[cfg(test)]
mod e2e_tests;
#[cfg(test)]
mod testing;
