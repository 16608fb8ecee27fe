//! Build summary rendering
//!
//! Produces the Markdown document published for the job step. Rendering is
//! pure; publishing goes through [`crate::artifact::JobPlatform`].

use crate::artifact::UploadResult;
use crate::bake::BakeDefinition;
use crate::builder::BuilderInfo;
use crate::history::ExportResult;
use crate::inputs::Inputs;
use std::fmt::Write;

/// Everything the summary is composed from
#[derive(Debug, Clone, Copy)]
pub struct BuildSummary<'a> {
    pub export: &'a ExportResult,
    pub upload: Option<&'a UploadResult>,
    pub inputs: Option<&'a Inputs>,
    pub definition: Option<&'a BakeDefinition>,
    pub builder: Option<&'a BuilderInfo>,
}

impl BuildSummary<'_> {
    /// Render the summary as Markdown
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "## Docker Build summary\n");

        self.render_record(&mut out);
        self.render_refs(&mut out);
        self.render_builder(&mut out);
        self.render_targets(&mut out);
        self.render_inputs(&mut out);

        out
    }

    fn render_record(&self, out: &mut String) {
        let filename = self.export.filename();
        match self.upload {
            Some(upload) => {
                let _ = writeln!(
                    out,
                    "Build record: [{}]({}) ({})\n",
                    filename,
                    upload.url,
                    self.export.human_size()
                );
            }
            None => {
                let _ = writeln!(
                    out,
                    "Build record: `{}` ({}, not uploaded)\n",
                    filename,
                    self.export.human_size()
                );
            }
        }
    }

    fn render_refs(&self, out: &mut String) {
        let _ = writeln!(out, "### Build references\n");
        for reference in &self.export.refs {
            let _ = writeln!(out, "- `{}`", reference);
        }
        out.push('\n');
    }

    fn render_builder(&self, out: &mut String) {
        let Some(builder) = self.builder else {
            return;
        };
        let _ = writeln!(out, "### Builder\n");
        let _ = writeln!(out, "| Name | Driver | Endpoint |");
        let _ = writeln!(out, "|------|--------|----------|");
        let _ = writeln!(
            out,
            "| {} | {} | {} |\n",
            cell(&builder.name),
            cell(&builder.driver),
            cell(builder.endpoint().unwrap_or("-"))
        );
    }

    fn render_targets(&self, out: &mut String) {
        let Some(definition) = self.definition.filter(|d| !d.is_empty()) else {
            return;
        };
        let _ = writeln!(out, "### Targets\n");
        let _ = writeln!(out, "| Target | Context | Dockerfile | Platforms | Tags |");
        let _ = writeln!(out, "|--------|---------|------------|-----------|------|");
        for (name, target) in &definition.target {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                cell(name),
                cell(target.context.as_deref().unwrap_or(".")),
                cell(target.dockerfile.as_deref().unwrap_or("Dockerfile")),
                cell(&join_or_dash(&target.platforms)),
                cell(&join_or_dash(&target.tags)),
            );
        }
        out.push('\n');
    }

    fn render_inputs(&self, out: &mut String) {
        let Some(rows) = self.inputs.map(Inputs::summary_rows).filter(|r| !r.is_empty()) else {
            return;
        };
        let _ = writeln!(out, "<details><summary>Inputs</summary>\n");
        let _ = writeln!(out, "| Name | Value |");
        let _ = writeln!(out, "|------|-------|");
        for (name, value) in rows {
            let _ = writeln!(out, "| {} | {} |", name, cell(&value));
        }
        let _ = writeln!(out, "\n</details>\n");
    }
}

fn join_or_dash(values: &[String]) -> String {
    if values.is_empty() {
        "-".to_string()
    } else {
        values.join(", ")
    }
}

/// Escape a value for use inside a Markdown table cell
fn cell(value: &str) -> String {
    value.replace('|', "\\|").replace('\n', "<br>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bake::Target;
    use std::path::PathBuf;

    fn export() -> ExportResult {
        ExportResult {
            path: PathBuf::from("/tmp/run/org~repo~ABC123.dockerbuild"),
            size: 1536,
            refs: vec!["abc123".to_string()],
        }
    }

    #[test]
    fn test_render_full_summary() {
        let mut definition = BakeDefinition::default();
        definition.target.insert(
            "app".to_string(),
            Target {
                context: Some(".".to_string()),
                platforms: vec!["linux/amd64".to_string(), "linux/arm64".to_string()],
                tags: vec!["org/app:latest".to_string()],
                ..Default::default()
            },
        );
        let inputs = Inputs {
            targets: vec!["app".to_string()],
            set: vec!["*.args.A=1|2".to_string()],
            ..Default::default()
        };
        let upload = UploadResult {
            id: "99".to_string(),
            filename: "org~repo~ABC123.dockerbuild".to_string(),
            digest: "00".to_string(),
            size: 1536,
            url: "https://github.com/org/repo/actions/runs/1/artifacts/99".to_string(),
        };
        let builder = BuilderInfo {
            name: "ci".to_string(),
            driver: "docker-container".to_string(),
            ..Default::default()
        };
        let export = export();

        let markdown = BuildSummary {
            export: &export,
            upload: Some(&upload),
            inputs: Some(&inputs),
            definition: Some(&definition),
            builder: Some(&builder),
        }
        .render();

        assert!(markdown.contains(
            "[org~repo~ABC123.dockerbuild](https://github.com/org/repo/actions/runs/1/artifacts/99)"
        ));
        assert!(markdown.contains("- `abc123`"));
        assert!(markdown.contains("| app | . | Dockerfile | linux/amd64, linux/arm64 | org/app:latest |"));
        assert!(markdown.contains("| ci | docker-container | - |"));
        assert!(markdown.contains("*.args.A=1\\|2"));
    }

    #[test]
    fn test_render_without_upload_or_state() {
        let export = export();
        let markdown = BuildSummary {
            export: &export,
            upload: None,
            inputs: None,
            definition: None,
            builder: None,
        }
        .render();

        assert!(markdown.contains("not uploaded"));
        assert!(markdown.contains("- `abc123`"));
        assert!(!markdown.contains("### Targets"));
        assert!(!markdown.contains("<details>"));
    }
}
