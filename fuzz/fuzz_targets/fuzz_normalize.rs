#![no_main]

use libfuzzer_sys::fuzz_target;
use vexhub_crawler::source::normalize;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data)
        && let Ok(descriptor) = normalize(input)
    {
        let rendered = descriptor.to_string();
        let again = normalize(&rendered).expect("rendered descriptor must normalize");
        assert_eq!(descriptor, again, "normalize must be idempotent");
        assert!(descriptor.repo_url().starts_with("https://"));
        assert!(descriptor.repo_url().ends_with(".git"));
    }
});
