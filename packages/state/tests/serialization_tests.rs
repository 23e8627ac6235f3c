//! Persisted format: round trips, kind versions, config loading

mod common;

use common::{editor_with_error_log, init_tracing};
use folio_state::{
    Editor, EditorConfig, EditorError, EditorResult, Fields, NodeKind, NodeShape, UpdateOptions,
};
use serde_json::{json, Value};

/// Heading kind whose v1 format stored the HTML tag instead of a level
#[derive(Debug)]
struct HeadingKind;

impl NodeKind for HeadingKind {
    fn node_type(&self) -> &str {
        "heading"
    }

    fn shape(&self) -> NodeShape {
        NodeShape::Element
    }

    fn version(&self) -> u32 {
        2
    }

    fn default_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("level".into(), json!(1));
        fields
    }

    fn migrate(&self, fields: &mut Fields, from_version: u32) -> EditorResult<()> {
        if from_version < 2 {
            let tag = fields.remove("tag").unwrap_or(Value::Null);
            let level = tag
                .as_str()
                .and_then(|t| t.strip_prefix('h'))
                .and_then(|n| n.parse::<u64>().ok())
                .ok_or_else(|| EditorError::Serialization(format!("bad heading tag {}", tag)))?;
            fields.insert("level".into(), json!(level));
        }
        Ok(())
    }
}

/// Caption block holding at most one child
#[derive(Debug)]
struct CaptionKind;

impl NodeKind for CaptionKind {
    fn node_type(&self) -> &str {
        "caption"
    }

    fn shape(&self) -> NodeShape {
        NodeShape::Element
    }

    fn max_children(&self) -> Option<usize> {
        Some(1)
    }
}

fn custom_editor() -> anyhow::Result<Editor> {
    init_tracing();
    Ok(Editor::builder().node(HeadingKind).node(CaptionKind).build()?)
}

fn text(value: &str) -> Value {
    json!({
        "type": "text", "version": 1, "text": value,
        "detail": 0, "format": 0, "mode": "normal", "style": ""
    })
}

fn document() -> Value {
    json!({
        "root": {
            "type": "root", "version": 1,
            "direction": null, "format": "", "indent": 0,
            "children": [
                {
                    "type": "paragraph", "version": 1,
                    "direction": null, "format": "", "indent": 0,
                    "children": [text("Hello"), { "type": "linebreak", "version": 1 }, text("World")]
                },
                {
                    "type": "paragraph", "version": 1,
                    "direction": "ltr", "format": "center", "indent": 1,
                    "children": [text("second")]
                }
            ]
        }
    })
}

#[test]
fn test_round_trip_through_editor() -> anyhow::Result<()> {
    let (editor, errors) = editor_with_error_log();
    let doc = document();

    let state = editor.parse_editor_state(&doc.to_string())?;
    assert_eq!(state.version(), 0);
    editor.set_editor_state(state)?;

    let committed = editor.get_editor_state();
    assert_eq!(committed.version(), 1);
    assert_eq!(committed.to_json()?, doc);
    assert_eq!(committed.text_content(), "Hello\nWorld\n\nsecond");
    assert!(errors.borrow().is_empty());
    Ok(())
}

#[test]
fn test_display_matches_json() -> anyhow::Result<()> {
    let (editor, _errors) = editor_with_error_log();
    editor.set_editor_state(editor.parse_editor_state(&document().to_string())?)?;

    let state = editor.get_editor_state();
    assert_eq!(state.to_string(), serde_json::to_string(&state.to_json()?)?);
    Ok(())
}

#[test]
fn test_missing_fields_take_kind_defaults() -> anyhow::Result<()> {
    let (editor, _errors) = editor_with_error_log();
    let doc = r#"{"root": {"type": "root", "version": 1, "children": [
        {"type": "paragraph", "version": 1, "children": [
            {"type": "text", "version": 1, "text": "bare"}
        ]}
    ]}}"#;
    editor.set_editor_state(editor.parse_editor_state(doc)?)?;

    let json = editor.get_editor_state().to_json()?;
    let leaf = &json["root"]["children"][0]["children"][0];
    assert_eq!(leaf["mode"], "normal");
    assert_eq!(leaf["format"], 0);
    assert_eq!(json["root"]["children"][0]["indent"], 0);
    Ok(())
}

#[test]
fn test_old_heading_version_is_migrated() -> anyhow::Result<()> {
    let editor = custom_editor()?;
    let doc = json!({
        "root": { "type": "root", "version": 1, "children": [
            { "type": "heading", "version": 1, "tag": "h2", "children": [
                { "type": "text", "version": 1, "text": "Title" }
            ]}
        ]}
    });

    editor.set_editor_state(editor.parse_editor_state(&doc.to_string())?)?;

    let json = editor.get_editor_state().to_json()?;
    let heading = &json["root"]["children"][0];
    assert_eq!(heading["version"], 2);
    assert_eq!(heading["level"], 2);
    assert!(heading.get("tag").is_none());
    Ok(())
}

#[test]
fn test_newer_version_rejected() -> anyhow::Result<()> {
    let editor = custom_editor()?;
    let doc = json!({
        "root": { "type": "root", "version": 1, "children": [
            { "type": "heading", "version": 3, "level": 1, "children": [] }
        ]}
    });

    let result = editor.parse_editor_state(&doc.to_string());
    assert!(matches!(result, Err(EditorError::Serialization(_))));
    Ok(())
}

#[test]
fn test_max_children_enforced_on_parse_and_append() -> anyhow::Result<()> {
    let editor = custom_editor()?;
    let crowded = json!({
        "root": { "type": "root", "version": 1, "children": [
            { "type": "caption", "version": 1, "children": [
                { "type": "text", "version": 1, "text": "a" },
                { "type": "text", "version": 1, "text": "b" }
            ]}
        ]}
    });
    let parsed = editor.parse_editor_state(&crowded.to_string());
    assert!(matches!(parsed, Err(EditorError::Serialization(_))));

    let result = editor.update(
        |tx| {
            let caption = tx.create_node("caption")?;
            tx.append("root", caption.key())?;
            let first = tx.create_text("a")?;
            tx.append(caption.key(), first.key())?;
            let second = tx.create_text("b")?;
            tx.append(caption.key(), second.key())
        },
        UpdateOptions::discrete(),
    );
    assert!(matches!(result, Err(EditorError::InvalidOperation(_))));
    assert!(editor.get_editor_state().is_empty());
    Ok(())
}

#[test]
fn test_malformed_json_is_serialization_error() {
    let (editor, _errors) = editor_with_error_log();
    let result = editor.parse_editor_state("{\"root\": ");
    assert!(matches!(result, Err(EditorError::Serialization(_))));
}

#[test]
fn test_config_loaded_from_json() -> anyhow::Result<()> {
    let config = EditorConfig::from_json(r#"{"namespace": "notes", "maxTransformPasses": 3}"#)?;
    assert_eq!(config.max_transform_passes, 3);
    assert!(config.editable);

    let editor = Editor::builder().config(config).build()?;
    assert_eq!(editor.config().namespace, "notes");
    assert!(editor.is_editable());
    Ok(())
}

#[test]
fn test_invalid_config_rejected() {
    let zero = EditorConfig::from_json(r#"{"maxTransformPasses": 0}"#);
    assert!(matches!(zero, Err(EditorError::Config(_))));

    let garbled = EditorConfig::from_json(r#"{"editable": "yes"}"#);
    assert!(matches!(garbled, Err(EditorError::Config(_))));
}

#[test]
fn test_replace_only_child_of_full_parent() -> anyhow::Result<()> {
    let editor = custom_editor()?;
    editor.update(
        |tx| {
            let caption = tx.create_node("caption")?;
            tx.append("root", caption.key())?;
            let old = tx.create_text("old")?;
            tx.append(caption.key(), old.key())?;
            let new = tx.create_text("new")?;
            tx.replace(old.key(), new.key(), false)
        },
        UpdateOptions::discrete(),
    )?;

    assert_eq!(editor.get_editor_state().text_content(), "new");
    Ok(())
}
