//! clap adapter: renders a [`CommandModel`] as a `clap::Command` and turns
//! the resulting `ArgMatches` into a [`CommandTree`].
//!
//! Every parameter becomes a clap argument whose id is the parameter id, so
//! matches can be traced back to the model without name lookups. Options of
//! ancestor commands are repeated on descendants (unless a descendant
//! declares the same backing property) so they may be given after a
//! sub-command name, as in `app remote add --verbose`.

use std::ffi::OsString;
use std::sync::Arc;

use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::model::{CommandId, CommandInfo, CommandModel};
use crate::parameter::{CommandParameter, ParameterKind, ParameterRole};
use crate::tree::CommandTree;

const DEFAULT_APP_NAME: &str = "app";

/// clap's builder API wants `'static` strings for names, ids and value
/// names. The model is built once per process, so the leaked text is bounded
/// by the size of the command tree.
fn leak_str<S: Into<String>>(s: S) -> &'static str {
    Box::leak(s.into().into_boxed_str())
}

// =====================
// Model -> clap
// =====================

pub fn build_cli(model: &CommandModel) -> Command {
    let settings = model.settings();
    let name = settings.application_name.as_deref().unwrap_or(DEFAULT_APP_NAME);
    let mut app = Command::new(leak_str(name)).args_override_self(true);
    if let Some(version) = &settings.application_version {
        app = app.version(leak_str(version.clone()));
    }
    if let Some(help) = examples_help(name, model.examples()) {
        app = app.after_help(help);
    }

    match model.default_command() {
        Some(default) => app = add_parameters(app, default.parameters(), 0),
        None => app = app.subcommand_required(true).arg_required_else_help(true),
    }

    add_children_commands(app, model, model.roots(), &[], name)
}

fn add_children_commands<'m>(
    mut app: Command,
    model: &'m CommandModel,
    children: impl Iterator<Item = &'m CommandInfo>,
    inherited: &[Arc<CommandParameter>],
    path: &str,
) -> Command {
    for child in children.filter(|c| !c.is_default_command()) {
        let child_path = format!("{} {}", path, child.name());
        let sub = build_command(model, child, inherited, &child_path);
        app = app.subcommand(sub);
    }
    app
}

fn build_command(
    model: &CommandModel,
    info: &CommandInfo,
    inherited: &[Arc<CommandParameter>],
    path: &str,
) -> Command {
    let mut cmd = Command::new(leak_str(info.name())).args_override_self(true);
    if let Some(about) = info.description() {
        cmd = cmd.about(about.to_string());
    }
    if !info.aliases().is_empty() {
        cmd = cmd.aliases(info.aliases().iter().map(|a| leak_str(a.clone())));
    }
    if info.is_hidden() {
        cmd = cmd.hide(true);
    }
    if let Some(help) = examples_help(path, info.examples()) {
        cmd = cmd.after_help(help);
    }

    cmd = add_parameters(cmd, info.parameters(), 0);

    // Ancestor options the command does not redeclare.
    let mut visible: Vec<Arc<CommandParameter>> = inherited
        .iter()
        .filter(|p| !info.parameters().iter().any(|own| own.have_same_backing_property_as(p)))
        .cloned()
        .collect();
    for option in &visible {
        cmd = cmd.arg(to_arg(option, 0));
    }

    if info.is_branch() {
        match model.default_child(info.id()) {
            Some(default) => {
                let own_arguments = info.arguments().len();
                let extra: Vec<Arc<CommandParameter>> = default
                    .parameters()
                    .iter()
                    .filter(|p| {
                        !info.parameters().iter().any(|own| own.have_same_backing_property_as(p))
                            && !visible.iter().any(|v| v.have_same_backing_property_as(p))
                    })
                    .cloned()
                    .collect();
                cmd = add_parameters(cmd, &extra, own_arguments);
            }
            None => cmd = cmd.subcommand_required(true),
        }
    }

    visible.extend(info.options().cloned());
    debug!("Built clap command '{}' with {} arguments", path, cmd.get_arguments().count());
    add_children_commands(cmd, model, model.children(info.id()), &visible, path)
}

fn add_parameters(mut cmd: Command, parameters: &[Arc<CommandParameter>], offset: usize) -> Command {
    for parameter in parameters {
        cmd = cmd.arg(to_arg(parameter, offset));
    }
    cmd
}

fn to_arg(parameter: &CommandParameter, offset: usize) -> Arg {
    let mut arg = Arg::new(leak_str(parameter.id().to_string())).required(false);
    if let Some(help) = parameter.description() {
        arg = arg.help(help.to_string());
    }
    if parameter.is_hidden() {
        arg = arg.hide(true);
    }

    match parameter.role() {
        ParameterRole::Option(info) => {
            let mut longs = info.long_names.iter();
            if let Some(long) = longs.next() {
                arg = arg.long(leak_str(long.clone()));
            }
            let extra_longs: Vec<&'static str> = longs.map(|l| leak_str(l.clone())).collect();
            if !extra_longs.is_empty() {
                arg = arg.visible_aliases(extra_longs);
            }
            let mut shorts = info.short_names.iter().filter_map(|s| s.chars().next());
            if let Some(short) = shorts.next() {
                arg = arg.short(short);
            }
            let extra_shorts: Vec<char> = shorts.collect();
            if !extra_shorts.is_empty() {
                arg = arg.visible_short_aliases(extra_shorts);
            }
            if let Some(value_name) = &info.value_name {
                arg = arg.value_name(leak_str(value_name.clone()));
            }

            arg = match parameter.kind() {
                ParameterKind::Flag if info.value_name.is_none() => arg.action(ArgAction::SetTrue),
                ParameterKind::FlagWithValue => arg
                    .action(ArgAction::Set)
                    .num_args(0..=1)
                    .default_missing_value(""),
                ParameterKind::Vector | ParameterKind::Pair => arg.action(ArgAction::Append).num_args(1),
                ParameterKind::Flag | ParameterKind::Scalar => arg.action(ArgAction::Set).num_args(1),
            };
        }
        ParameterRole::Argument(info) => {
            arg = arg
                .index(info.position + offset + 1)
                .value_name(leak_str(info.value_name.clone()));
            arg = if parameter.kind() == ParameterKind::Vector {
                arg.action(ArgAction::Append).num_args(1..)
            } else {
                arg.action(ArgAction::Set).num_args(1)
            };
        }
    }
    arg
}

fn examples_help(path: &str, examples: &[Vec<String>]) -> Option<String> {
    if examples.is_empty() {
        return None;
    }
    let lines: Vec<String> = examples
        .iter()
        .map(|args| format!("  {} {}", path, args.join(" ")))
        .collect();
    Some(format!("Examples:\n{}", lines.join("\n")))
}

// =====================
// clap -> CommandTree
// =====================

/// Matches `args` (including the program name) against the model.
pub fn tokenize<I, T>(model: &CommandModel, args: I) -> Result<CommandTree>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = build_cli(model).try_get_matches_from(args)?;
    parse_tree(model, &matches)
}

/// Command names from the root matches down to the deepest sub-command.
pub fn collect_subcommand_path(matches: &ArgMatches) -> (Vec<String>, &ArgMatches) {
    let mut path: Vec<String> = Vec::new();
    let mut current = matches;
    while let Some((name, sub_m)) = current.subcommand() {
        path.push(name.to_string());
        current = sub_m;
    }
    (path, current)
}

/// Builds the matched command chain from clap's matches.
pub fn parse_tree(model: &CommandModel, matches: &ArgMatches) -> Result<CommandTree> {
    let levels = matched_levels(model, matches)?;
    let mut nodes: Vec<CommandTree> = levels
        .iter()
        .map(|(id, _)| CommandTree::new(model.command(*id)))
        .collect();

    let mut seen: Vec<&ArgMatches> = Vec::new();
    for (_, level_matches) in &levels {
        if seen.iter().any(|m| std::ptr::eq(*m, *level_matches)) {
            continue;
        }
        seen.push(level_matches);
        map_supplied(model, level_matches, &mut nodes);
    }

    let mut tree: Option<CommandTree> = None;
    for node in nodes.into_iter().rev() {
        tree = Some(match tree {
            Some(next) => node.with_next(next),
            None => node,
        });
    }
    tree.ok_or_else(|| Error::binding("No command was matched"))
}

fn matched_levels<'a>(model: &CommandModel, matches: &'a ArgMatches) -> Result<Vec<(CommandId, &'a ArgMatches)>> {
    let (path, _) = collect_subcommand_path(matches);
    debug!("Matched command path: {:?}", path);

    let mut levels: Vec<(CommandId, &'a ArgMatches)> = Vec::new();
    let mut current = matches;
    let mut parent: Option<CommandId> = None;
    while let Some((name, sub)) = current.subcommand() {
        let info = match parent {
            None => model.find_root(name),
            Some(id) => model.find_child(id, name),
        }
        .ok_or_else(|| Error::binding(format!("Unknown command '{}'", name)))?;
        levels.push((info.id(), sub));
        parent = Some(info.id());
        current = sub;
    }

    match parent {
        None => {
            let default = model
                .default_command()
                .ok_or_else(|| Error::binding("No command was specified"))?;
            levels.push((default.id(), matches));
        }
        Some(id) if model.command(id).is_branch() => {
            let default = model.default_child(id).ok_or_else(|| {
                Error::binding(format!("Command '{}' requires a sub-command", model.command(id).name()))
            })?;
            levels.push((default.id(), current));
        }
        Some(_) => {}
    }
    Ok(levels)
}

fn map_supplied(model: &CommandModel, matches: &ArgMatches, nodes: &mut [CommandTree]) {
    for id in matches.ids() {
        let id = id.as_str();
        if matches.value_source(id) != Some(ValueSource::CommandLine) {
            continue;
        }
        let Some(parameter) = lookup_parameter(model, id) else {
            continue;
        };
        let Some(node) = nodes
            .iter_mut()
            .find(|n| model.command(n.command).parameters().iter().any(|p| p.id() == parameter.id()))
        else {
            continue;
        };

        let raw: Vec<String> = matches
            .get_raw(id)
            .map(|values| values.map(|v| v.to_string_lossy().into_owned()).collect())
            .unwrap_or_default();
        trace!("Matched {} = {:?}", parameter.display_name(), raw);

        match parameter.kind() {
            ParameterKind::Flag if parameter.as_option().is_some_and(|o| o.value_name.is_none()) => {
                node.map(parameter, Some("true".to_string()));
            }
            ParameterKind::FlagWithValue => {
                let value = raw.into_iter().last().filter(|v| !v.is_empty());
                node.map(parameter, value);
            }
            ParameterKind::Vector | ParameterKind::Pair => {
                for value in raw {
                    node.map(parameter, Some(value));
                }
            }
            ParameterKind::Flag | ParameterKind::Scalar => {
                node.map(parameter, raw.into_iter().last());
            }
        }
    }
}

fn lookup_parameter<'m>(model: &'m CommandModel, id: &str) -> Option<&'m Arc<CommandParameter>> {
    let index = id.strip_prefix('p')?.parse::<usize>().ok()?;
    model.parameters.get(index)
}
