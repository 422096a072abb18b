//! Conversions from script values into task descriptors.

use indexmap::IndexMap;
use rhai::{Array, Dynamic, EvalAltResult, Map};
use std::path::{Path, PathBuf};

use crate::firmware::FirmwarePipeline;
use crate::task::{context_error, resolve_path, Action, Command};

type ConvertResult<T> = Result<T, Box<EvalAltResult>>;

fn text(value: Dynamic, label: &str) -> ConvertResult<String> {
    let type_name = value.type_name();
    value.into_string().map_err(|_| {
        context_error(format!("{} expects a string, got {}.", label, type_name))
    })
}

/// A single string or an array of strings.
pub(super) fn string_list(value: Dynamic, label: &str) -> ConvertResult<Vec<String>> {
    if value.is_array() {
        value
            .cast::<Array>()
            .into_iter()
            .map(|item| text(item, label))
            .collect()
    } else {
        Ok(vec![text(value, label)?])
    }
}

/// A shell line, or an argument vector given as an array.
pub(super) fn command(value: Dynamic, label: &str) -> ConvertResult<Command> {
    if value.is_array() {
        let argv = string_list(value, label)?;
        if argv.is_empty() || argv[0].trim().is_empty() {
            return Err(context_error(format!(
                "{} needs a program as the first argv element.",
                label
            )));
        }
        Ok(Command::Argv(argv))
    } else {
        let line = text(value, label)?;
        if line.trim().is_empty() {
            return Err(context_error(format!("{} requires a non-empty command.", label)));
        }
        Ok(Command::Shell(line))
    }
}

pub(super) fn actions(list: Array) -> ConvertResult<Vec<Action>> {
    list.into_iter()
        .map(|item| command(item, "actions()").map(Action::new))
        .collect()
}

pub(super) fn env_map(map: Map) -> ConvertResult<IndexMap<String, String>> {
    let mut vars = IndexMap::new();
    for (key, value) in map {
        let value = if value.is_string() {
            text(value, "env()")?
        } else if value.is_unit() {
            String::new()
        } else {
            value.to_string()
        };
        vars.insert(key.to_string(), value);
    }
    Ok(vars)
}

fn int<T: TryFrom<i64>>(value: Dynamic, key: &str) -> ConvertResult<T> {
    let raw = value.as_int().map_err(|type_name| {
        context_error(format!(
            "firmware_pipeline(): '{}' expects an integer, got {}.",
            key, type_name
        ))
    })?;
    T::try_from(raw).map_err(|_| {
        context_error(format!(
            "firmware_pipeline(): '{}' is out of range: {}.",
            key, raw
        ))
    })
}

fn path(value: Dynamic, key: &str, root: &Path) -> ConvertResult<PathBuf> {
    let raw = text(value, &format!("firmware_pipeline() '{}'", key))?;
    Ok(resolve_path(root, &raw))
}

/// Argument vector given as an array, or as a string split on whitespace.
fn argv(value: Dynamic, key: &str) -> ConvertResult<Vec<String>> {
    let label = format!("firmware_pipeline() '{}'", key);
    if value.is_array() {
        string_list(value, &label)
    } else {
        Ok(text(value, &label)?
            .split_whitespace()
            .map(str::to_string)
            .collect())
    }
}

/// Builds a pipeline from the conventional layout at `root`, overridden by
/// the keys present in `map`.
pub(super) fn pipeline_from_map(map: Map, root: &Path) -> ConvertResult<FirmwarePipeline> {
    let mut pipeline = FirmwarePipeline::new(root);
    for (key, value) in map {
        match key.as_str() {
            "key_dir" => pipeline.key_dir = path(value, &key, root)?,
            "private_key" => pipeline.private_key = path(value, &key, root)?,
            "public_key" => pipeline.public_key = path(value, &key, root)?,
            "firmware_dir" => pipeline.firmware_dir = path(value, &key, root)?,
            "signed_dir" => pipeline.signed_dir = path(value, &key, root)?,
            "build_file" => pipeline.build_file = path(value, &key, root)?,
            "binaries" => {
                pipeline.binaries = string_list(value, "firmware_pipeline() 'binaries'")?
            }
            "toolchain" => pipeline.toolchain = argv(value, &key)?,
            "toolchain_fallback" => {
                pipeline.toolchain_fallback = if value.is_unit() {
                    None
                } else {
                    Some(argv(value, &key)?)
                }
            }
            "sign_tool" => pipeline.sign_tool = argv(value, &key)?,
            "version" => {
                pipeline.version = if value.is_string() {
                    text(value, "firmware_pipeline() 'version'")?
                } else {
                    value.to_string()
                }
            }
            "header_size" => pipeline.layout.header_size = int(value, &key)?,
            "align" => pipeline.layout.align = int(value, &key)?,
            "slot_size" => pipeline.layout.slot_size = int(value, &key)?,
            "erased_val" => pipeline.layout.erased_val = int(value, &key)?,
            "rom_fixed" => pipeline.layout.rom_fixed = int(value, &key)?,
            "scratch_dirs" => {
                pipeline.scratch_dirs = string_list(value, "firmware_pipeline() 'scratch_dirs'")?
                    .iter()
                    .map(|raw| resolve_path(root, raw))
                    .collect()
            }
            "requirements" => {
                pipeline.requirements = if value.is_unit() {
                    None
                } else {
                    Some(path(value, &key, root)?)
                }
            }
            other => {
                return Err(context_error(format!(
                    "firmware_pipeline(): unknown key '{}'.",
                    other
                )))
            }
        }
    }
    Ok(pipeline)
}
