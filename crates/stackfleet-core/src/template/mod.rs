//! Template helpers: object keys and URLs, serverless rewriting, stack
//! policies and the generated bootstrap template.

pub mod bootstrap;
pub mod policy;
pub mod serverless;
pub mod yaml;

pub use policy::{PolicyDocument, Statement};

/// Region whose object-storage host has no dash-separated region segment.
const LEGACY_REGION: &str = "us-east-1";

/// Object key of an uploaded template: the run UID followed by the
/// template path as written in the manifest.
pub fn template_key(run_uid: &str, template_path: &str) -> String {
    format!("{}/{}", run_uid, template_path.trim_start_matches('/'))
}

/// Public URL the control plane reads an uploaded template from.
pub fn template_url(region: &str, bucket: &str, key: &str) -> String {
    if region == LEGACY_REGION {
        format!("https://s3.{}.amazonaws.com/{}/{}", region, bucket, key)
    } else {
        format!("https://s3-{}.amazonaws.com/{}/{}", region, bucket, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regional_urls_use_dash_host() {
        assert_eq!(
            template_url("eu-west-1", "tpl", "run/app.json"),
            "https://s3-eu-west-1.amazonaws.com/tpl/run/app.json"
        );
    }

    #[test]
    fn us_east_1_has_no_dash_region_segment() {
        let url = template_url("us-east-1", "tpl", "run/app.json");
        assert_eq!(url, "https://s3.us-east-1.amazonaws.com/tpl/run/app.json");
        let host = url.trim_start_matches("https://").split('/').next().unwrap();
        assert!(!host.contains("s3-"));
    }

    #[test]
    fn keys_never_double_the_separator() {
        assert_eq!(template_key("abc", "stacks/app.json"), "abc/stacks/app.json");
        assert_eq!(template_key("abc", "/srv/app.json"), "abc/srv/app.json");
    }
}
