#![forbid(unsafe_code)]

//! Console logging shared by the binaries.

use log::LevelFilter;

/// Installs the `colog` backend. `verbose` switches from info to debug.
pub fn init(verbose: bool) {
    let mut builder = colog::default_builder();
    builder.filter(None, level_for(verbose));
    builder.init();
}

fn level_for(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}
