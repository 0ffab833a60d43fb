#![no_main]
use libfuzzer_sys::fuzz_target;
use vsource_config::{Catalog, PresetKind};

fuzz_target!(|data: &str| {
    // Arbitrary catalogs layered over the builtin one must resolve or fail, never panic.
    let Ok(user) = Catalog::from_toml_str(data) else {
        return;
    };
    let Ok(mut catalog) = Catalog::builtin() else {
        return;
    };
    catalog.merge(user);

    let harvesters: Vec<String> = catalog
        .names(PresetKind::Harvester)
        .map(str::to_owned)
        .collect();
    for name in &harvesters {
        let _ = catalog.harvester(name);
    }
    let sources: Vec<String> = catalog.names(PresetKind::Source).map(str::to_owned).collect();
    for name in &sources {
        if let Ok(src) = catalog.source(name) {
            let _ = catalog.harvester(&src.harvester);
        }
    }
});
