//! Template engine based on MiniJinja

use keel_core::{Chart, ReleaseOptions, RenderContext, Values};
use minijinja::{Environment, UndefinedBehavior};
use std::collections::BTreeMap;

use crate::error::{EngineError, Result, TemplateError};
use crate::filters;
use crate::renderer::Renderer;

/// Directory prefix stripped from template names inside the environment
const TEMPLATES_DIR: &str = "templates/";

/// Template engine builder
pub struct EngineBuilder {
    strict_mode: bool,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self { strict_mode: true }
    }

    /// Fail on undefined variables (default: on)
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    pub fn build(self) -> Engine {
        Engine::new(self.strict_mode)
    }
}

/// MiniJinja-backed [`Renderer`]
#[derive(Debug, Clone)]
pub struct Engine {
    strict_mode: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Engine {
    pub fn new(strict_mode: bool) -> Self {
        Self { strict_mode }
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    fn create_environment(&self) -> Environment<'static> {
        let mut env = Environment::new();

        env.set_undefined_behavior(if self.strict_mode {
            UndefinedBehavior::Strict
        } else {
            UndefinedBehavior::Lenient
        });
        env.set_keep_trailing_newline(true);

        env.add_filter("toyaml", filters::toyaml);
        env.add_filter("tojson", filters::tojson);
        env.add_filter("b64encode", filters::b64encode);
        env.add_filter("quote", filters::quote);
        env.add_filter("indent", filters::indent);
        env.add_filter("nindent", filters::nindent);
        env.add_filter("required", filters::required);
        env.add_filter("trunc", filters::trunc);

        env
    }

    /// Render one chart level, then recurse into enabled sub-charts
    fn render_chart(
        &self,
        chart: &Chart,
        values: &Values,
        options: &ReleaseOptions,
        prefix: &str,
        out: &mut BTreeMap<String, String>,
    ) -> Result<()> {
        let mut env = self.create_environment();
        let mut sources = Vec::with_capacity(chart.templates.len());

        for template in &chart.templates {
            let key = format!("{}/{}", prefix, template.path);
            let text = String::from_utf8(template.data.clone())
                .map_err(|_| EngineError::InvalidUtf8 { path: key.clone() })?;
            let name = template_name(&template.path);

            env.add_template_owned(name.clone(), text.clone())
                .map_err(|e| TemplateError::from_minijinja(&e, &key, &text))?;
            sources.push((name, key, text, template.is_partial()));
        }

        let ctx = RenderContext::new(values, options, &chart.metadata).to_json();

        for (name, key, text, partial) in &sources {
            if *partial {
                continue;
            }
            let rendered = env
                .get_template(name)
                .and_then(|tmpl| tmpl.render(&ctx))
                .map_err(|e| TemplateError::from_minijinja(&e, key, text))?;
            out.insert(key.clone(), rendered);
        }

        for sub_chart in &chart.dependencies {
            let declaration = chart.dependency_declaration(sub_chart.name());
            if declaration.is_some_and(|d| !d.is_enabled(values.inner())) {
                tracing::debug!(chart = %chart.name(), sub_chart = %sub_chart.name(), "sub-chart disabled by condition");
                continue;
            }

            let scope = declaration
                .map(|d| d.effective_name())
                .unwrap_or_else(|| sub_chart.name());
            let sub_values = Values::for_subchart(&sub_chart.values, values, scope);
            let sub_prefix = format!("{}/charts/{}", prefix, sub_chart.name());

            self.render_chart(sub_chart, &sub_values, options, &sub_prefix, out)?;
        }

        Ok(())
    }
}

impl Renderer for Engine {
    fn render(
        &self,
        chart: &Chart,
        values: &Values,
        options: &ReleaseOptions,
    ) -> Result<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        self.render_chart(chart, values, options, chart.name(), &mut out)?;
        Ok(out)
    }
}

/// Name a template is registered under, used by `{% include %}`
fn template_name(path: &str) -> String {
    path.strip_prefix(TEMPLATES_DIR).unwrap_or(path).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TemplateErrorKind;
    use keel_core::{ChartDependency, ChartMetadata};
    use semver::Version;

    fn options() -> ReleaseOptions {
        ReleaseOptions::for_install("myapp", "default")
    }

    fn web_chart() -> Chart {
        Chart::new(ChartMetadata::new("web", Version::new(1, 0, 0)))
            .with_values(Values::from_yaml("replicas: 2\nname: web\n").unwrap())
            .with_template("templates/_name.tpl", "name: {{ release.name }}-{{ chart.name }}")
            .with_template(
                "templates/deployment.yaml",
                "{% include '_name.tpl' %}\nreplicas: {{ values.replicas }}\n",
            )
            .with_template("templates/NOTES.txt", "Installed {{ release.name }}")
    }

    #[test]
    fn test_render_keys_and_partials() {
        let chart = web_chart();
        let out = Engine::default().render(&chart, &chart.values, &options()).unwrap();

        let keys: Vec<&str> = out.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["web/templates/NOTES.txt", "web/templates/deployment.yaml"]);
        assert_eq!(out["web/templates/deployment.yaml"], "name: myapp-web\nreplicas: 2\n");
        assert_eq!(out["web/templates/NOTES.txt"], "Installed myapp");
    }

    #[test]
    fn test_strict_undefined_is_error() {
        let chart = Chart::new(ChartMetadata::new("bad", Version::new(0, 1, 0)))
            .with_template("templates/cm.yaml", "value: {{ values.missing.deep }}");

        let err = Engine::default()
            .render(&chart, &Values::new(), &options())
            .unwrap_err();

        match err {
            EngineError::Template(t) => {
                assert_eq!(t.path, "bad/templates/cm.yaml");
                assert_eq!(t.kind(), TemplateErrorKind::UndefinedVariable);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_lenient_mode_renders_empty() {
        let chart = Chart::new(ChartMetadata::new("lax", Version::new(0, 1, 0)))
            .with_template("templates/cm.yaml", "value: '{{ values.missing }}'");
        let engine = Engine::builder().strict(false).build();

        let out = engine.render(&chart, &Values::new(), &options()).unwrap();
        assert_eq!(out["lax/templates/cm.yaml"], "value: ''");
    }

    #[test]
    fn test_subchart_scoping_and_condition() {
        let cache = Chart::new(ChartMetadata::new("cache", Version::new(1, 0, 0)))
            .with_values(Values::from_yaml("size: 1\n").unwrap())
            .with_template("templates/cm.yaml", "size: {{ values.size }}\nenv: {{ values.global.env }}");
        let queue = Chart::new(ChartMetadata::new("queue", Version::new(1, 0, 0)))
            .with_template("templates/q.yaml", "kind: Queue");

        let mut parent_meta = ChartMetadata::new("app", Version::new(1, 0, 0));
        parent_meta.dependencies.push(ChartDependency {
            name: "queue".to_string(),
            version: "1.0.0".to_string(),
            repository: String::new(),
            condition: Some("queue.enabled".to_string()),
            alias: None,
        });
        let parent = Chart::new(parent_meta)
            .with_template("templates/a.yaml", "kind: A")
            .with_dependency(cache)
            .with_dependency(queue);

        let values = Values::from_yaml("global:\n  env: prod\ncache:\n  size: 5\nqueue:\n  enabled: false\n").unwrap();
        let out = Engine::default().render(&parent, &values, &options()).unwrap();

        assert_eq!(out["app/charts/cache/templates/cm.yaml"], "size: 5\nenv: prod");
        assert!(!out.contains_key("app/charts/queue/templates/q.yaml"));
    }

    #[test]
    fn test_invalid_utf8_template() {
        let chart = Chart::new(ChartMetadata::new("bin", Version::new(0, 1, 0)))
            .with_template("templates/blob.yaml", vec![0xff, 0xfe]);

        let err = Engine::default().render(&chart, &Values::new(), &options()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidUtf8 { .. }));
    }
}
