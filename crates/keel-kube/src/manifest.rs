//! Manifest assembly

use std::collections::BTreeMap;

/// File name of the rendered post-install notes
pub const NOTES_FILE: &str = "NOTES.txt";

/// Concatenate plain manifests into one multi-document blob
///
/// Each non-empty entry is emitted as `\n---\n# Source: <path>\n<body>`.
/// Entries are visited in path order, so equal inputs give byte-identical
/// output.
pub fn assemble(plain: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (path, body) in plain {
        if body.trim().is_empty() {
            continue;
        }
        out.push_str("\n---\n# Source: ");
        out.push_str(path);
        out.push('\n');
        out.push_str(body);
    }
    out
}

/// Pull the top-level chart's `NOTES.txt` out of rendered output
///
/// Notes of sub-charts are discarded. Returns the remaining entries and the
/// notes text, if any.
pub fn split_notes(
    chart_name: &str,
    mut rendered: BTreeMap<String, String>,
) -> (BTreeMap<String, String>, Option<String>) {
    let top_level = format!("{}/templates/{}", chart_name, NOTES_FILE);
    let notes = rendered.remove(&top_level).filter(|n| !n.trim().is_empty());
    rendered.retain(|path, _| !path.ends_with(NOTES_FILE));
    (rendered, notes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_format() {
        let mut plain = BTreeMap::new();
        plain.insert("hello/hello".to_string(), "hello: world".to_string());

        assert_eq!(assemble(&plain), "\n---\n# Source: hello/hello\nhello: world");
    }

    #[test]
    fn test_assemble_is_sorted_and_skips_empty() {
        let entries = [
            ("app/templates/z.yaml", "z: 1\n"),
            ("app/templates/a.yaml", "a: 1\n"),
            ("app/templates/blank.yaml", "   \n"),
            ("app/charts/db/templates/m.yaml", "m: 1\n"),
        ];

        let forward: BTreeMap<String, String> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let reverse: BTreeMap<String, String> = entries
            .iter()
            .rev()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let out = assemble(&forward);
        assert_eq!(out, assemble(&reverse));
        assert_eq!(
            out,
            "\n---\n# Source: app/charts/db/templates/m.yaml\nm: 1\n\
             \n---\n# Source: app/templates/a.yaml\na: 1\n\
             \n---\n# Source: app/templates/z.yaml\nz: 1\n"
        );
        assert!(!out.contains("blank.yaml"));
    }

    #[test]
    fn test_split_notes() {
        let mut rendered = BTreeMap::new();
        rendered.insert("web/templates/NOTES.txt".to_string(), "visit me".to_string());
        rendered.insert("web/charts/db/templates/NOTES.txt".to_string(), "db notes".to_string());
        rendered.insert("web/templates/svc.yaml".to_string(), "kind: Service".to_string());

        let (rest, notes) = split_notes("web", rendered);

        assert_eq!(notes.as_deref(), Some("visit me"));
        assert_eq!(rest.keys().collect::<Vec<_>>(), vec!["web/templates/svc.yaml"]);
    }
}
