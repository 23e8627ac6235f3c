//! Transform scheduling: fixed points, pass ordering, divergence

mod common;

use common::{append_paragraph, counter, editor_with_error_log, seed_paragraph};
use folio_state::{Editor, EditorConfig, EditorError, UpdateOptions};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

fn register_uppercase(editor: &Editor) -> anyhow::Result<Rc<RefCell<usize>>> {
    let (count, calls) = counter();
    let _handle = editor.register_node_transform("text", move |tx, node| {
        *count.borrow_mut() += 1;
        let text = node.text().unwrap_or_default();
        let upper = text.to_uppercase();
        if upper != text {
            tx.set_text(node.key(), &upper)?;
        }
        Ok(())
    })?;
    Ok(calls)
}

#[test]
fn test_uppercase_transform_reaches_fixed_point() -> anyhow::Result<()> {
    let (editor, errors) = editor_with_error_log();
    let calls = register_uppercase(&editor)?;

    seed_paragraph(&editor, "foo")?;

    assert_eq!(editor.get_editor_state().text_content(), "FOO");
    assert_eq!(*calls.borrow(), 2);
    assert!(errors.borrow().is_empty());
    Ok(())
}

#[test]
fn test_converged_content_stays_clean() -> anyhow::Result<()> {
    let (editor, _errors) = editor_with_error_log();
    let _calls = register_uppercase(&editor)?;
    seed_paragraph(&editor, "foo")?;

    let (count, seen) = counter();
    let _handle = editor.register_update_listener(move |_, _| *count.borrow_mut() += 1);
    let before = editor.get_editor_state();

    editor.update(|tx| tx.text_content("root").map(|_| ()), UpdateOptions::discrete())?;

    assert!(Arc::ptr_eq(&before, &editor.get_editor_state()));
    assert_eq!(*seen.borrow(), 0);
    Ok(())
}

#[test]
fn test_divergent_transform_rolls_back() -> anyhow::Result<()> {
    let config = EditorConfig {
        max_transform_passes: 10,
        ..EditorConfig::default()
    };
    let editor = Editor::builder().config(config).build()?;
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = errors.clone();
    editor.set_error_handler(move |err| sink.borrow_mut().push(err.clone()));

    let _handle = editor.register_node_transform("text", |tx, node| {
        let grown = format!("{}!", node.text().unwrap_or_default());
        tx.set_text(node.key(), &grown)
    })?;

    let result = editor.update(|tx| append_paragraph(tx, "loop").map(|_| ()), UpdateOptions::discrete());

    assert_eq!(result, Err(EditorError::TransformDivergence { passes: 11 }));
    assert!(editor.get_editor_state().is_empty());
    assert_eq!(editor.get_editor_state().version(), 0);
    assert!(!editor.has_pending_update());

    let errors = errors.borrow();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].classification(), "infinite transform recursion");
    Ok(())
}

#[test]
fn test_registering_transform_marks_existing_nodes() -> anyhow::Result<()> {
    let (editor, _errors) = editor_with_error_log();
    seed_paragraph(&editor, "shout")?;

    let calls = register_uppercase(&editor)?;
    assert_eq!(editor.read(|tx| tx.text_content("root"))?, "SHOUT");
    assert_eq!(*calls.borrow(), 2);
    Ok(())
}

#[test]
fn test_element_transforms_only_for_intentional_writes() -> anyhow::Result<()> {
    let (editor, _errors) = editor_with_error_log();
    let (count, paragraph_calls) = counter();
    let _paragraph = editor.register_node_transform("paragraph", move |_, _| {
        *count.borrow_mut() += 1;
        Ok(())
    })?;
    let (count, root_calls) = counter();
    let _root = editor.register_node_transform("root", move |_, _| {
        *count.borrow_mut() += 1;
        Ok(())
    })?;
    // registering applies the root transform to the existing root once
    editor.commit_pending();
    assert_eq!(*root_calls.borrow(), 1);
    *root_calls.borrow_mut() = 0;

    let (paragraph, text) = seed_paragraph(&editor, "a")?;
    assert_eq!(*paragraph_calls.borrow(), 1);
    assert_eq!(*root_calls.borrow(), 1);

    // a leaf write dirties the paragraph only by propagation
    editor.update(|tx| tx.set_text(&text, "b"), UpdateOptions::discrete())?;
    assert_eq!(*paragraph_calls.borrow(), 1);
    assert_eq!(*root_calls.borrow(), 2);

    editor.update(
        |tx| tx.set_field(&paragraph, "indent", serde_json::json!(1)),
        UpdateOptions::discrete(),
    )?;
    assert_eq!(*paragraph_calls.borrow(), 2);
    assert_eq!(*root_calls.borrow(), 3);
    Ok(())
}

#[test]
fn test_transforms_stop_once_node_is_detached() -> anyhow::Result<()> {
    let (editor, _errors) = editor_with_error_log();
    let _remover = editor.register_node_transform("text", |tx, node| {
        if node.text() == Some("remove me") {
            tx.remove(node.key())?;
        }
        Ok(())
    })?;
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let _observer = editor.register_node_transform("text", move |_, node| {
        sink.borrow_mut().push(node.text().unwrap_or_default().to_string());
        Ok(())
    })?;

    editor.update(
        |tx| {
            let (paragraph, _) = append_paragraph(tx, "keep")?;
            let doomed = tx.create_text("remove me")?;
            tx.append(&paragraph, doomed.key())
        },
        UpdateOptions::discrete(),
    )?;

    assert!(seen.borrow().iter().all(|text| text == "keep"));
    assert!(!seen.borrow().is_empty());
    assert_eq!(editor.get_editor_state().text_content(), "keep");
    assert_eq!(editor.get_editor_state().keys_of_type("text").len(), 1);
    Ok(())
}

#[test]
fn test_transform_can_issue_nested_update() -> anyhow::Result<()> {
    let (editor, _errors) = editor_with_error_log();
    let _split = editor.register_node_transform("text", |tx, node| {
        if node.text() != Some("a|b") {
            return Ok(());
        }
        let key = node.key().clone();
        tx.editor().update(
            move |inner| {
                inner.set_text(&key, "a")?;
                let rest = inner.create_text("b")?;
                let gap = inner.create_node("linebreak")?;
                inner.insert_after(&key, gap.key())?;
                inner.insert_after(gap.key(), rest.key())
            },
            UpdateOptions::default(),
        )
    })?;
    let (count, commits) = counter();
    let _handle = editor.register_update_listener(move |_, _| *count.borrow_mut() += 1);

    seed_paragraph(&editor, "a|b")?;

    assert_eq!(*commits.borrow(), 1);
    assert_eq!(editor.get_editor_state().text_content(), "a\nb");
    Ok(())
}

#[test]
fn test_unregistered_transform_no_longer_runs() -> anyhow::Result<()> {
    let (editor, _errors) = editor_with_error_log();
    let (count, calls) = counter();
    let handle = editor.register_node_transform("text", move |_, _| {
        *count.borrow_mut() += 1;
        Ok(())
    })?;

    seed_paragraph(&editor, "one")?;
    assert_eq!(*calls.borrow(), 1);

    assert!(handle.unregister());
    seed_paragraph(&editor, "two")?;
    assert_eq!(*calls.borrow(), 1);
    Ok(())
}

#[test]
fn test_skip_transforms() -> anyhow::Result<()> {
    let (editor, _errors) = editor_with_error_log();
    let calls = register_uppercase(&editor)?;

    editor.update(
        |tx| append_paragraph(tx, "quiet").map(|_| ()),
        UpdateOptions::discrete().skip_transforms(),
    )?;

    assert_eq!(editor.get_editor_state().text_content(), "quiet");
    assert_eq!(*calls.borrow(), 0);
    Ok(())
}

#[test]
fn test_transform_for_unknown_type_rejected() {
    let (editor, _errors) = editor_with_error_log();
    let result = editor.register_node_transform("table", |_, _| Ok(()));
    assert!(matches!(result, Err(EditorError::UnknownNodeType(_))));
}

#[test]
fn test_pass_order_leaves_first_root_last() -> anyhow::Result<()> {
    let (editor, errors) = editor_with_error_log();
    let log: Rc<RefCell<Vec<(String, String)>>> = Rc::new(RefCell::new(Vec::new()));

    let mut handles = Vec::new();
    for node_type in ["text", "root"] {
        let sink = log.clone();
        handles.push(editor.register_node_transform(node_type, move |_, node| {
            sink.borrow_mut().push((node.node_type().to_string(), node.key().to_string()));
            Ok(())
        })?);
    }
    let sink = log.clone();
    let redirtied = Rc::new(Cell::new(false));
    handles.push(editor.register_node_transform("paragraph", move |tx, node| {
        sink.borrow_mut().push((node.node_type().to_string(), node.key().to_string()));
        if !redirtied.replace(true) {
            for child in tx.children(node.key())? {
                tx.mark_dirty(child.key())?;
            }
        }
        Ok(())
    })?);
    editor.commit_pending();
    log.borrow_mut().clear();

    let (paragraph, text) = seed_paragraph(&editor, "a")?;

    let entry = |node_type: &str, key: &str| (node_type.to_string(), key.to_string());
    assert_eq!(
        *log.borrow(),
        vec![
            entry("text", &text),
            entry("paragraph", &paragraph),
            entry("root", "root"),
            // the leaf dirtied during the element pass gets its own pass
            entry("text", &text),
            entry("root", "root"),
        ]
    );
    assert!(errors.borrow().is_empty());
    Ok(())
}
