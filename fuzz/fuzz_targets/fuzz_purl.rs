#![no_main]

use std::path::{Component, Path};

use libfuzzer_sys::fuzz_target;
use vexhub_crawler::purl::PackageIdentity;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data)
        && let Ok(identity) = input.parse::<PackageIdentity>()
    {
        let rendered = identity.to_string();
        let reparsed: PackageIdentity = rendered.parse().expect("rendered identity must parse");
        assert_eq!(identity, reparsed);
        assert!(identity.matches(&reparsed));

        if let Ok(dir) = identity.curated_dir(Path::new("/hub")) {
            assert!(dir.starts_with("/hub/pkg"));
            assert!(dir.components().all(|c| c != Component::ParentDir));
        }
    }
});
