//! Shared fixtures for the integration tests
#![allow(dead_code)]

use folio_state::{Editor, EditorError, EditorResult, NodeKey, Transaction, UpdateOptions};
use std::cell::RefCell;
use std::rc::Rc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Editor whose reported errors are collected instead of logged
pub fn editor_with_error_log() -> (Editor, Rc<RefCell<Vec<EditorError>>>) {
    init_tracing();
    let editor = Editor::new().expect("default editor");
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = errors.clone();
    editor.set_error_handler(move |err| sink.borrow_mut().push(err.clone()));
    (editor, errors)
}

/// Append `paragraph > text(text)` to the root; returns (paragraph, text)
pub fn append_paragraph(tx: &Transaction, text: &str) -> EditorResult<(NodeKey, NodeKey)> {
    let paragraph = tx.create_node("paragraph")?;
    let leaf = tx.create_text(text)?;
    tx.append(paragraph.key(), leaf.key())?;
    tx.append("root", paragraph.key())?;
    Ok((paragraph.key().clone(), leaf.key().clone()))
}

/// Commit one paragraph synchronously and hand back its keys
pub fn seed_paragraph(editor: &Editor, text: &str) -> anyhow::Result<(NodeKey, NodeKey)> {
    let mut keys = None;
    editor.update(
        |tx| {
            keys = Some(append_paragraph(tx, text)?);
            Ok(())
        },
        UpdateOptions::discrete(),
    )?;
    keys.ok_or_else(|| anyhow::anyhow!("seed update did not run"))
}

pub fn counter() -> (Rc<RefCell<usize>>, Rc<RefCell<usize>>) {
    let count = Rc::new(RefCell::new(0));
    (count.clone(), count)
}
