//! Template upload, including packaging of serverless function code.

use std::path::Path;

use anyhow::Context;
use serde_json::Value;
use uuid::Uuid;

use super::{StackContext, progress};
use crate::fs::{package_code, resolve_path};
use crate::manifest::StackSpec;
use crate::remote::{ArtifactStore, RegionSession};
use crate::retry::{Cadence, Polled, STANDARD, retry_call};
use crate::template::bootstrap::SOURCE_BUCKET_RESOURCE;
use crate::template::{serverless, template_key, template_url, yaml};

/// Resource type prefix of the serverless transform.
const SERVERLESS_PREFIX: &str = "AWS::Serverless";

/// Template ready for validation and submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTemplate {
    pub url: String,
    pub serverless: bool,
}

/// Uploads templates and function code for one stack.
pub struct Uploader<'a> {
    pub session: &'a RegionSession,
    pub cadence: &'a Cadence,
    pub bootstrap_stack: &'a str,
}

impl Uploader<'_> {
    /// Make the stack's template reachable by URL.
    ///
    /// A preset template URL is used as is. Otherwise the local template is
    /// packaged when it is serverless and uploaded under the run UID.
    pub fn prepare(&self, spec: &StackSpec, ctx: &StackContext) -> anyhow::Result<PreparedTemplate> {
        let local = (!spec.template_path.is_empty())
            .then(|| resolve_path(&ctx.template_root, &spec.template_path));

        if let Some(url) = &spec.template_url {
            let serverless = local
                .as_deref()
                .filter(|path| path.is_file())
                .and_then(|path| read_template(path).ok())
                .and_then(|(_, parsed)| parsed)
                .is_some_and(|template| serverless::is_serverless(&template));
            return Ok(PreparedTemplate {
                url: url.clone(),
                serverless,
            });
        }

        let Some(path) = local else {
            anyhow::bail!("Stack {} has neither a template path nor a template URL", spec.name);
        };
        let (raw, parsed) = read_template(&path)?;

        let (body, serverless) = match parsed {
            Some(mut template) if serverless::is_serverless(&template) => {
                progress(
                    ctx.quiet,
                    format_args!("Packaging serverless stack {}", spec.name),
                );
                let base = path.parent().unwrap_or_else(|| Path::new("."));
                self.package_functions(&mut template, base, &spec.name)?;
                let body = serde_json::to_vec_pretty(&template)
                    .context("Failed to serialize packaged template")?;
                (body, true)
            }
            _ => (raw, false),
        };

        let key = template_key(&ctx.run_uid, &spec.template_path);
        self.upload(&ctx.bucket, &key, body, &spec.name)
            .with_context(|| format!("Template upload for stack {} failed", spec.name))?;

        Ok(PreparedTemplate {
            url: template_url(&ctx.region, &ctx.bucket, &key),
            serverless,
        })
    }

    fn package_functions(&self, template: &mut Value, base: &Path, stack: &str) -> anyhow::Result<()> {
        let view: &Value = template;
        let functions: Vec<(String, String)> = serverless::functions(view)
            .into_iter()
            .filter_map(|name| {
                let uri = serverless::local_code_uri(view, &name)?.to_string();
                Some((name, uri))
            })
            .collect();
        if functions.is_empty() {
            return Ok(());
        }

        let source_bucket = self.source_bucket()?;
        for (function, code_uri) in functions {
            let code_path = resolve_path(base, &code_uri);
            let archive = package_code(&code_path)
                .with_context(|| format!("Failed to package code of function {}", function))?;
            let key = format!("lambda/{}", Uuid::new_v4());
            self.upload(&source_bucket, &key, archive, stack)
                .with_context(|| format!("Code upload for function {} failed", function))?;
            tracing::debug!("{}: {} -> s3://{}/{}", stack, function, source_bucket, key);
            serverless::set_code_uri(template, &function, &format!("s3://{}/{}", source_bucket, key));
        }
        Ok(())
    }

    fn source_bucket(&self) -> anyhow::Result<String> {
        let polled = retry_call(self.cadence.run(), self.bootstrap_stack, &STANDARD, || {
            self.session
                .stacks
                .physical_resource_id(self.bootstrap_stack, SOURCE_BUCKET_RESOURCE)
        })
        .with_context(|| {
            format!(
                "Failed to look up {} of stack {}",
                SOURCE_BUCKET_RESOURCE, self.bootstrap_stack
            )
        })?;
        match polled {
            Polled::Ready(bucket) => Ok(bucket),
            Polled::Benign(_, error) => anyhow::bail!(
                "Failed to look up {} of stack {}: {}",
                SOURCE_BUCKET_RESOURCE,
                self.bootstrap_stack,
                error.message
            ),
        }
    }

    fn upload(&self, bucket: &str, key: &str, body: Vec<u8>, label: &str) -> anyhow::Result<()> {
        let artifacts: &dyn ArtifactStore = self.session.artifacts.as_ref();
        let polled = retry_call(self.cadence.submit(), label, &STANDARD, || {
            artifacts.upload(bucket, key, body.clone())
        })?;
        match polled {
            Polled::Ready(()) => Ok(()),
            Polled::Benign(_, error) => {
                anyhow::bail!("Upload to s3://{}/{} failed: {}", bucket, key, error.message)
            }
        }
    }
}

/// Raw template bytes, plus the parsed document when the template is JSON
/// or YAML.
///
/// An unparseable template is uploaded as is, unless it names serverless
/// resources, which can only be packaged from a parsed document.
fn read_template(path: &Path) -> anyhow::Result<(Vec<u8>, Option<Value>)> {
    let raw = std::fs::read(path)
        .with_context(|| format!("Failed to read template: {}", path.display()))?;
    if let Ok(parsed) = serde_json::from_slice(&raw) {
        return Ok((raw, Some(parsed)));
    }
    match yaml::parse(&raw) {
        Ok(parsed) => Ok((raw, Some(parsed))),
        Err(error) if String::from_utf8_lossy(&raw).contains(SERVERLESS_PREFIX) => Err(
            error.context(format!("Failed to parse serverless template: {}", path.display())),
        ),
        Err(_) => Ok((raw, None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteError;
    use crate::remote::fake::{FakeCloud, Op, SOURCE_BUCKET, TEMPLATES_BUCKET};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    const BOOTSTRAP: &str = "stackfleet-bootstrap";

    fn session(cloud: &Arc<FakeCloud>, region: &str) -> RegionSession {
        RegionSession {
            region: region.to_string(),
            stacks: cloud.clone(),
            artifacts: cloud.clone(),
        }
    }

    fn context(root: &Path, region: &str) -> StackContext {
        StackContext {
            region: region.to_string(),
            run_uid: "run-1".to_string(),
            bucket: TEMPLATES_BUCKET.to_string(),
            order: 0,
            template_root: root.to_path_buf(),
            role_arn: None,
            quiet: true,
        }
    }

    fn spec(path: &str) -> StackSpec {
        StackSpec {
            name: "api".to_string(),
            template_path: path.to_string(),
            ..StackSpec::default()
        }
    }

    #[test]
    fn plain_template_is_uploaded_verbatim() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("api.yaml"), "Resources: {}\n").unwrap();
        let cloud = Arc::new(FakeCloud::bootstrapped(BOOTSTRAP));
        let session = session(&cloud, "eu-west-1");
        let cadence = Cadence::uniform(Duration::from_millis(1));
        let uploader = Uploader {
            session: &session,
            cadence: &cadence,
            bootstrap_stack: BOOTSTRAP,
        };

        let prepared = uploader
            .prepare(&spec("api.yaml"), &context(tmp.path(), "eu-west-1"))
            .unwrap();

        assert!(!prepared.serverless);
        assert_eq!(
            prepared.url,
            "https://s3-eu-west-1.amazonaws.com/templates-bucket/run-1/api.yaml"
        );
        assert_eq!(
            cloud.uploaded(TEMPLATES_BUCKET, "run-1/api.yaml").unwrap(),
            b"Resources: {}\n"
        );
    }

    #[test]
    fn preset_url_skips_upload() {
        let tmp = TempDir::new().unwrap();
        let cloud = Arc::new(FakeCloud::bootstrapped(BOOTSTRAP));
        let session = session(&cloud, "us-east-1");
        let cadence = Cadence::uniform(Duration::from_millis(1));
        let uploader = Uploader {
            session: &session,
            cadence: &cadence,
            bootstrap_stack: BOOTSTRAP,
        };
        let mut spec = spec("");
        spec.template_url = Some("https://example.com/api.json".to_string());

        let prepared = uploader
            .prepare(&spec, &context(tmp.path(), "us-east-1"))
            .unwrap();

        assert_eq!(prepared.url, "https://example.com/api.json");
        assert!(cloud.upload_keys(TEMPLATES_BUCKET).is_empty());
    }

    #[test]
    fn serverless_code_is_packaged_and_rewritten() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("handler")).unwrap();
        std::fs::write(tmp.path().join("handler").join("index.js"), "exports.x = 1;").unwrap();
        let template = json!({
            "Transform": "AWS::Serverless-2016-10-31",
            "Resources": {
                "Fn": {
                    "Type": "AWS::Serverless::Function",
                    "Properties": { "CodeUri": "handler", "Runtime": "nodejs20.x" }
                },
                "Remote": {
                    "Type": "AWS::Serverless::Function",
                    "Properties": { "CodeUri": "s3://elsewhere/code.zip" }
                }
            }
        });
        std::fs::write(tmp.path().join("fn.json"), template.to_string()).unwrap();

        let cloud = Arc::new(FakeCloud::bootstrapped(BOOTSTRAP));
        let session = session(&cloud, "us-east-1");
        let cadence = Cadence::uniform(Duration::from_millis(1));
        let uploader = Uploader {
            session: &session,
            cadence: &cadence,
            bootstrap_stack: BOOTSTRAP,
        };

        let prepared = uploader
            .prepare(&spec("fn.json"), &context(tmp.path(), "us-east-1"))
            .unwrap();

        assert!(prepared.serverless);
        assert_eq!(
            prepared.url,
            "https://s3.us-east-1.amazonaws.com/templates-bucket/run-1/fn.json"
        );

        let code_keys = cloud.upload_keys(SOURCE_BUCKET);
        assert_eq!(code_keys.len(), 1);
        assert!(code_keys[0].starts_with("lambda/"));

        let body = cloud.uploaded(TEMPLATES_BUCKET, "run-1/fn.json").unwrap();
        let packaged: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            packaged["Resources"]["Fn"]["Properties"]["CodeUri"],
            format!("s3://{}/{}", SOURCE_BUCKET, code_keys[0])
        );
        assert_eq!(
            packaged["Resources"]["Remote"]["Properties"]["CodeUri"],
            "s3://elsewhere/code.zip"
        );
    }

    #[test]
    fn missing_template_names_the_path() {
        let tmp = TempDir::new().unwrap();
        let cloud = Arc::new(FakeCloud::bootstrapped(BOOTSTRAP));
        let session = session(&cloud, "eu-west-1");
        let cadence = Cadence::uniform(Duration::from_millis(1));
        let uploader = Uploader {
            session: &session,
            cadence: &cadence,
            bootstrap_stack: BOOTSTRAP,
        };

        let err = uploader
            .prepare(&spec("nope.json"), &context(tmp.path(), "eu-west-1"))
            .unwrap_err();
        assert!(err.to_string().contains("nope.json"));
    }

    #[test]
    fn benign_upload_answer_is_not_a_success() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("api.json"), r#"{"Resources":{}}"#).unwrap();
        let cloud = Arc::new(FakeCloud::bootstrapped(BOOTSTRAP));
        cloud.fail(
            Op::Upload,
            RemoteError::validation("No updates are to be performed."),
        );
        let session = session(&cloud, "eu-west-1");
        let cadence = Cadence::uniform(Duration::from_millis(1));
        let uploader = Uploader {
            session: &session,
            cadence: &cadence,
            bootstrap_stack: BOOTSTRAP,
        };

        let err = uploader
            .prepare(&spec("api.json"), &context(tmp.path(), "eu-west-1"))
            .unwrap_err();

        assert!(format!("{err:#}").contains("No updates are to be performed"));
        assert!(cloud.upload_keys(TEMPLATES_BUCKET).is_empty());
    }

    #[test]
    fn yaml_serverless_template_is_packaged() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("handler")).unwrap();
        std::fs::write(tmp.path().join("handler").join("index.js"), "exports.x = 1;").unwrap();
        std::fs::write(
            tmp.path().join("fn.yaml"),
            "Transform: AWS::Serverless-2016-10-31\n\
             Resources:\n\
             \x20 Fn:\n\
             \x20   Type: AWS::Serverless::Function\n\
             \x20   Properties:\n\
             \x20     CodeUri: handler\n\
             \x20     Role: !GetAtt FnRole.Arn\n",
        )
        .unwrap();
        let cloud = Arc::new(FakeCloud::bootstrapped(BOOTSTRAP));
        let session = session(&cloud, "eu-west-1");
        let cadence = Cadence::uniform(Duration::from_millis(1));
        let uploader = Uploader {
            session: &session,
            cadence: &cadence,
            bootstrap_stack: BOOTSTRAP,
        };

        let prepared = uploader
            .prepare(&spec("fn.yaml"), &context(tmp.path(), "eu-west-1"))
            .unwrap();

        assert!(prepared.serverless);
        let code_keys = cloud.upload_keys(SOURCE_BUCKET);
        assert_eq!(code_keys.len(), 1);

        let body = cloud.uploaded(TEMPLATES_BUCKET, "run-1/fn.yaml").unwrap();
        let packaged: Value = serde_json::from_slice(&body).unwrap();
        let properties = &packaged["Resources"]["Fn"]["Properties"];
        assert_eq!(
            properties["CodeUri"],
            format!("s3://{}/{}", SOURCE_BUCKET, code_keys[0])
        );
        assert_eq!(properties["Role"], json!({ "Fn::GetAtt": ["FnRole", "Arn"] }));
    }

    #[test]
    fn unparseable_serverless_template_is_rejected() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("fn.yaml"),
            "Transform: AWS::Serverless-2016-10-31\nResources: [unclosed\n",
        )
        .unwrap();
        let cloud = Arc::new(FakeCloud::bootstrapped(BOOTSTRAP));
        let session = session(&cloud, "eu-west-1");
        let cadence = Cadence::uniform(Duration::from_millis(1));
        let uploader = Uploader {
            session: &session,
            cadence: &cadence,
            bootstrap_stack: BOOTSTRAP,
        };

        let err = uploader
            .prepare(&spec("fn.yaml"), &context(tmp.path(), "eu-west-1"))
            .unwrap_err();

        assert!(format!("{err:#}").contains("fn.yaml"));
        assert!(cloud.upload_keys(TEMPLATES_BUCKET).is_empty());
    }
}
