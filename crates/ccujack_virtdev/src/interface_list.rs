// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Registers the virtual device layer in the controller's interface list
//! file. The `<ipc>` entry is spliced in immediately before the closing
//! `</interfaces>` tag and the file is replaced atomically.

use ccujack_core::errors::{CcuJackError, ConfigError};
use std::fs;
use std::path::Path;

pub fn add_to_interface_list(
  in_file: &Path,
  out_file: &Path,
  name: &str,
  url: &str,
  info: &str,
) -> Result<(), CcuJackError> {
  let content = fs::read_to_string(in_file).map_err(|err| {
    CcuJackError::from(ConfigError::FileAccess(in_file.display().to_string(), err.to_string()))
  })?;
  // already registered?
  if content.contains(&format!("<name>{name}</name>")) {
    return Ok(());
  }
  let close_tag = "</interfaces>";
  let pos = content.find(close_tag).ok_or_else(|| {
    CcuJackError::from(ConfigError::InvalidDocument(
      in_file.display().to_string(),
      format!("Missing {close_tag} tag"),
    ))
  })?;
  let entry =
    format!("\t<ipc>\n\t\t<name>{name}</name>\n\t\t<url>{url}</url>\n\t\t<info>{info}</info>\n\t</ipc>\n");
  let mut patched = String::with_capacity(content.len() + entry.len());
  patched.push_str(&content[..pos]);
  patched.push_str(&entry);
  patched.push_str(&content[pos..]);
  // atomic replace
  let tmp_file = out_file.with_extension("tmp");
  fs::write(&tmp_file, patched).map_err(|err| {
    CcuJackError::from(ConfigError::WriteFailed(out_file.display().to_string(), err.to_string()))
  })?;
  fs::rename(&tmp_file, out_file).map_err(|err| {
    CcuJackError::from(ConfigError::WriteFailed(out_file.display().to_string(), err.to_string()))
  })?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  const INTERFACE_LIST: &str = "<?xml version=\"1.0\" encoding=\"utf-8\" ?>\n\
<interfaces v=\"1.0\">\n\
\t<ipc>\n\
\t\t<name>BidCos-RF</name>\n\
\t\t<url>xmlrpc_bin://127.0.0.1:32001</url>\n\
\t\t<info>BidCos-RF</info>\n\
\t</ipc>\n\
\t<ipc>\n\
\t\t<name>HmIP-RF</name>\n\
\t\t<url>xmlrpc://127.0.0.1:32010</url>\n\
\t\t<info>HmIP-RF</info>\n\
\t</ipc>\n\
</interfaces>\n";

  #[test]
  fn entry_is_inserted_before_the_closing_tag() {
    let dir = tempfile::tempdir().unwrap();
    let in_file = dir.path().join("InterfacesList.xml");
    let out_file = dir.path().join("out.xml");
    fs::write(&in_file, INTERFACE_LIST).unwrap();

    add_to_interface_list(
      &in_file,
      &out_file,
      "CCU-Jack",
      "xmlrpc://127.0.0.1:2121/RPC3",
      "CCU-Jack",
    )
    .unwrap();

    let content = fs::read_to_string(&out_file).unwrap();
    let expected = INTERFACE_LIST.replace(
      "</interfaces>",
      "\t<ipc>\n\t\t<name>CCU-Jack</name>\n\t\t<url>xmlrpc://127.0.0.1:2121/RPC3</url>\n\t\t<info>CCU-Jack</info>\n\t</ipc>\n</interfaces>",
    );
    assert_eq!(content, expected);
  }

  #[test]
  fn existing_entry_is_not_duplicated() {
    let dir = tempfile::tempdir().unwrap();
    let in_file = dir.path().join("InterfacesList.xml");
    fs::write(
      &in_file,
      INTERFACE_LIST.replace("HmIP-RF<", "CCU-Jack<"),
    )
    .unwrap();
    add_to_interface_list(&in_file, &in_file, "CCU-Jack", "url", "info").unwrap();
    // unchanged
    let content = fs::read_to_string(&in_file).unwrap();
    assert_eq!(content.matches("CCU-Jack").count(), 2);
  }

  #[test]
  fn missing_closing_tag_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let in_file = dir.path().join("broken.xml");
    fs::write(&in_file, "<interfaces>").unwrap();
    assert!(add_to_interface_list(&in_file, &in_file, "X", "u", "i").is_err());
  }
}
