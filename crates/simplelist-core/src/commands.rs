use std::path::Path;
use std::thread;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::aggregate;
use crate::cli::{
    AddArgs, Command, DoneArgs, EditArgs, FieldArgs, FilterCommand, ListArgs, TagCommand,
};
use crate::completion::{CompletionTracker, ScheduledCompletion, Toggle};
use crate::config::{Config, resolve_data_dir};
use crate::datastore::{DataStore, LocationRegistry, StoreError, import_file};
use crate::filter::{
    FieldOp, Filter, FilterError, FilterSet, MatchMode, TAGS_FIELD, TagOp, inherited_tags,
};
use crate::item::ItemId;
use crate::render::{Renderer, short_id};
use crate::sort::SortOrder;
use crate::store::{ItemStore, Settled};
use crate::tag::Tag;
use crate::view::{ViewOptions, visible};

#[instrument(skip(store, cfg, renderer, command))]
pub fn dispatch(
    store: &DataStore,
    cfg: &Config,
    renderer: &mut Renderer,
    command: Command,
) -> anyhow::Result<()> {
    let now = Utc::now();
    debug!(?command, "dispatching command");

    match command {
        Command::Add(args) => cmd_add(store, &args, now),
        Command::List(args) => cmd_list(store, cfg, renderer, &args),
        Command::Info { id } => cmd_info(store, renderer, &id),
        Command::Edit(args) => cmd_edit(store, &args, now),
        Command::Tag(sub) => cmd_tag(store, sub, now),
        Command::Field(args) => cmd_field(store, &args, now),
        Command::Done(args) => cmd_done(store, cfg, &args, now),
        Command::Delete { id } => cmd_delete(store, &id),
        Command::Tags { all } => {
            let items = store.load_items()?;
            let tags = aggregate::plain_tags(items.values(), all || cfg.show_completed());
            renderer.print_lines(tags)
        }
        Command::Fields { all } => {
            let items = store.load_items()?;
            let keys = aggregate::field_keys(items.values(), all || cfg.show_completed());
            renderer.print_lines(keys)
        }
        Command::Filter(sub) => cmd_filter(store, renderer, sub),
        Command::Import { path } => cmd_import(store, &path),
        Command::Export { path } => cmd_export(store, path.as_deref()),
        Command::Location { .. } => Err(anyhow!("location is handled before the datastore opens")),
    }
}

/// Shows or changes the save location. Runs without an open datastore so
/// it also works before any location was chosen.
#[instrument(skip(cfg, registry))]
pub fn cmd_location(
    cfg: &Config,
    registry: &LocationRegistry,
    data_override: Option<&Path>,
    dir: Option<&Path>,
) -> anyhow::Result<()> {
    if let Some(dir) = dir {
        let chosen = registry.select(dir)?;
        println!("Items are now saved in {}.", chosen.display());
        return Ok(());
    }

    match resolve_data_dir(cfg, data_override, registry) {
        Ok(current) => println!("{}", current.display()),
        Err(err)
            if matches!(
                err.downcast_ref::<StoreError>(),
                Some(StoreError::LocationNotSelected)
            ) =>
        {
            println!("No save location selected.");
        }
        Err(err) => return Err(err),
    }
    Ok(())
}

/// Resolves a full id or a unique prefix of one.
pub fn resolve_item_id(store: &ItemStore, prefix: &str) -> anyhow::Result<ItemId> {
    if store.contains(prefix) {
        return Ok(prefix.to_string());
    }
    resolve_prefix(store.ids_with_prefix(prefix), prefix, "item")
}

pub fn resolve_filter_id(set: &FilterSet, prefix: &str) -> anyhow::Result<String> {
    if set.contains_key(prefix) {
        return Ok(prefix.to_string());
    }
    let matches: Vec<&String> = set.keys().filter(|id| id.starts_with(prefix)).collect();
    resolve_prefix(matches, prefix, "filter")
}

fn resolve_prefix(matches: Vec<&String>, prefix: &str, what: &str) -> anyhow::Result<String> {
    if prefix.is_empty() {
        return Err(anyhow!("{what} id cannot be empty"));
    }
    match matches.as_slice() {
        [] => Err(anyhow!("no {what} matches id '{prefix}'")),
        [only] => Ok((*only).clone()),
        many => Err(anyhow!(
            "id '{prefix}' is ambiguous; it matches {} {what}s",
            many.len()
        )),
    }
}

/// Accepts operator labels regardless of case and spacing, plus the
/// shorthands `~`, `=`, `>`, `<`, `+` and `-`. Anything else is passed on
/// unchanged so validation can name it.
pub fn normalize_operator(field: &str, raw: &str) -> String {
    let squashed: String = raw
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .collect::<String>()
        .to_lowercase();

    if field == TAGS_FIELD {
        let alias = match squashed.as_str() {
            "+" => Some(TagOp::Include),
            "-" => Some(TagOp::Exclude),
            _ => TagOp::ALL
                .into_iter()
                .find(|op| op.label().to_lowercase() == squashed),
        };
        return alias.map(|op| op.label().to_string()).unwrap_or_else(|| raw.to_string());
    }

    let alias = match squashed.as_str() {
        "~" => Some(FieldOp::Contains),
        "=" | "==" => Some(FieldOp::Equals),
        ">" => Some(FieldOp::BiggerThen),
        "<" => Some(FieldOp::SmallerThen),
        _ => FieldOp::ALL
            .into_iter()
            .find(|op| op.label().replace(' ', "").to_lowercase() == squashed),
    };
    alias.map(|op| op.label().to_string()).unwrap_or_else(|| raw.to_string())
}

fn normalize_field(raw: &str) -> String {
    if raw.eq_ignore_ascii_case(TAGS_FIELD) {
        TAGS_FIELD.to_string()
    } else {
        raw.to_string()
    }
}

fn build_filter(field: &str, operator: &str, value: &str) -> Result<Filter, FilterError> {
    let field = normalize_field(field);
    let operator = normalize_operator(&field, operator);
    Filter::new(field, operator, value)
}

fn open_items(store: &DataStore) -> anyhow::Result<ItemStore> {
    Ok(ItemStore::new(store.load_items()?))
}

fn save_items(store: &DataStore, items: &ItemStore) -> anyhow::Result<()> {
    store.save_items(&items.snapshot())
}

fn cmd_add(store: &DataStore, args: &AddArgs, now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command add");

    let tags = parse_user_tags(&args.tags)?;
    let mut items = open_items(store)?;
    let saved = store.load_filters()?;
    let inherited = inherited_tags(saved.active());
    debug!(?inherited, "tags inherited from active filters");

    let id = items.open_draft(inherited, now);
    let summary = args.summary.join(" ");
    if !summary.trim().is_empty() {
        items.set_summary(&id, summary.trim(), now);
    }
    if let Some(description) = &args.description {
        items.set_description(&id, description, now);
    }
    for tag in tags {
        items.add_tag(&id, tag, now);
    }
    for kv in &args.fields {
        reject_reserved_field(&kv.key)?;
        items.set_field(&id, &kv.key, &kv.value, now);
    }

    match items.settle_draft(&id, now) {
        Settled::Discarded => {
            println!("Nothing to add.");
            return Ok(());
        }
        Settled::Missing => return Err(anyhow!("new item {id} disappeared before saving")),
        Settled::Titled | Settled::Kept => {}
    }

    save_items(store, &items)?;
    println!("Added item {}.", short_id(&id));
    Ok(())
}

fn cmd_list(
    store: &DataStore,
    cfg: &Config,
    renderer: &mut Renderer,
    args: &ListArgs,
) -> anyhow::Result<()> {
    info!("command list");

    let items = store.load_items()?;
    let saved = store.load_filters()?;
    let options = list_options(cfg, args)?;

    let unfiltered = FilterSet::new();
    let filter_set = if args.no_filter {
        &unfiltered
    } else {
        saved.active()
    };

    let rows = visible(items.values(), filter_set, &options);
    debug!(shown = rows.len(), total = items.len(), "list computed");
    renderer.print_item_table(&rows)
}

/// Command-line flags win over config settings.
pub fn list_options(cfg: &Config, args: &ListArgs) -> anyhow::Result<ViewOptions> {
    let match_mode = match &args.match_mode {
        Some(raw) => {
            MatchMode::parse(raw).ok_or_else(|| anyhow!("--match expects any or all, got: {raw}"))?
        }
        None => cfg.match_mode()?,
    };
    let order = if args.asc {
        SortOrder::Asc
    } else if args.desc {
        SortOrder::Desc
    } else {
        cfg.sort_order()?
    };

    Ok(ViewOptions {
        match_mode,
        query: args.search.clone().unwrap_or_default(),
        show_completed: args.show_completed || cfg.show_completed(),
        sort_field: Some(args.sort.clone().unwrap_or_else(|| cfg.sort_field())),
        order,
    })
}

fn cmd_info(store: &DataStore, renderer: &mut Renderer, prefix: &str) -> anyhow::Result<()> {
    let items = open_items(store)?;
    let id = resolve_item_id(&items, prefix)?;
    let item = items
        .get(&id)
        .ok_or_else(|| anyhow!("no item matches id '{prefix}'"))?;
    renderer.print_item_info(item)
}

fn cmd_edit(store: &DataStore, args: &EditArgs, now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command edit");
    if args.summary.is_none() && args.description.is_none() {
        return Err(anyhow!("edit needs --summary or --description"));
    }

    let mut items = open_items(store)?;
    let id = resolve_item_id(&items, &args.id)?;
    if let Some(summary) = &args.summary {
        items.set_summary(&id, summary.trim(), now);
    }
    if let Some(description) = &args.description {
        items.set_description(&id, description, now);
    }

    let outcome = items.settle_draft(&id, now);
    save_items(store, &items)?;
    match outcome {
        Settled::Discarded => println!("Item {} was left empty and removed.", short_id(&id)),
        Settled::Titled => println!("Item {} has no summary; marked untitled.", short_id(&id)),
        Settled::Kept | Settled::Missing => println!("Updated item {}.", short_id(&id)),
    }
    Ok(())
}

fn cmd_tag(store: &DataStore, sub: TagCommand, now: DateTime<Utc>) -> anyhow::Result<()> {
    let mut items = open_items(store)?;

    match sub {
        TagCommand::Add { id, tags } => {
            let id = resolve_item_id(&items, &id)?;
            let added = parse_user_tags(&tags)?
                .into_iter()
                .filter(|tag| items.add_tag(&id, tag.clone(), now))
                .count();
            save_items(store, &items)?;
            println!("Added {added} tag(s) to item {}.", short_id(&id));
        }
        TagCommand::Remove { id, tags } => {
            let id = resolve_item_id(&items, &id)?;
            let removed = parse_user_tags(&tags)?
                .iter()
                .filter(|tag| items.remove_tag(&id, tag, now))
                .count();
            save_items(store, &items)?;
            println!("Removed {removed} tag(s) from item {}.", short_id(&id));
        }
        TagCommand::Rename { id, from, to } => {
            let id = resolve_item_id(&items, &id)?;
            let current = parse_user_tag(&from)?;
            let new = parse_user_tag(&to)?;
            if !items.edit_tag(&id, &current, new, now) {
                return Err(anyhow!("item {} has no tag '{from}'", short_id(&id)));
            }
            save_items(store, &items)?;
            println!("Renamed tag '{from}' to '{to}' on item {}.", short_id(&id));
        }
    }
    Ok(())
}

fn parse_user_tag(raw: &str) -> anyhow::Result<Tag> {
    let tag = Tag::parse(raw);
    if tag.is_reserved() {
        return Err(anyhow!("tag '{raw}' is maintained automatically"));
    }
    Ok(tag)
}

fn parse_user_tags(raw: &[String]) -> anyhow::Result<Vec<Tag>> {
    raw.iter().map(|tag| parse_user_tag(tag)).collect()
}

fn reject_reserved_field(key: &str) -> anyhow::Result<()> {
    if key.is_empty() {
        return Err(anyhow!("field key cannot be empty"));
    }
    if Tag::field(key, "").is_reserved() {
        return Err(anyhow!("field '{key}' is maintained automatically"));
    }
    Ok(())
}

fn cmd_field(store: &DataStore, args: &FieldArgs, now: DateTime<Utc>) -> anyhow::Result<()> {
    let mut items = open_items(store)?;
    let id = resolve_item_id(&items, &args.id)?;

    if let Some(value) = &args.value {
        reject_reserved_field(&args.key)?;
        items.set_field(&id, &args.key, value, now);
        save_items(store, &items)?;
        println!("Set {}={value} on item {}.", args.key, short_id(&id));
    } else if args.remove {
        reject_reserved_field(&args.key)?;
        if !items.remove_field(&id, &args.key, now) {
            return Err(anyhow!("item {} has no field '{}'", short_id(&id), args.key));
        }
        save_items(store, &items)?;
        println!("Removed field {} from item {}.", args.key, short_id(&id));
    } else {
        let value = items
            .get(&id)
            .and_then(|item| item.field(&args.key))
            .ok_or_else(|| anyhow!("item {} has no field '{}'", short_id(&id), args.key))?;
        println!("{value}");
    }
    Ok(())
}

fn cmd_done(
    store: &DataStore,
    cfg: &Config,
    args: &DoneArgs,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command done");

    let mut items = open_items(store)?;
    let id = resolve_item_id(&items, &args.id)?;
    let mut tracker = CompletionTracker::new(cfg.completion_delay()?);
    let show_completed = args.immediate || cfg.show_completed();

    // A fresh tracker has nothing pending, so `Cancelled` cannot occur here.
    match tracker.toggle(&mut items, &id, now, show_completed) {
        Toggle::Missing | Toggle::Cancelled => Err(anyhow!("no item matches id '{}'", args.id)),
        Toggle::Reopened => {
            save_items(store, &items)?;
            println!("Reopened item {}.", short_id(&id));
            Ok(())
        }
        Toggle::Committed => {
            save_items(store, &items)?;
            println!("Completed item {}.", short_id(&id));
            Ok(())
        }
        Toggle::Scheduled(handle) => {
            println!(
                "Completing item {} in {} ms; interrupt to keep it open.",
                short_id(&id),
                tracker.delay().num_milliseconds()
            );
            let committed = finish_scheduled(store, &mut tracker, &handle, Utc::now)?;
            if committed.is_empty() {
                println!(
                    "Item {} was deleted or completed elsewhere; nothing written.",
                    short_id(&id)
                );
            } else {
                println!("Completed item {}.", short_id(&id));
            }
            Ok(())
        }
    }
}

/// Waits for a scheduled completion, then commits it against the
/// collection as it is on disk at that moment.
pub fn finish_scheduled<F>(
    store: &DataStore,
    tracker: &mut CompletionTracker,
    handle: &ScheduledCompletion,
    clock: F,
) -> anyhow::Result<Vec<ItemId>>
where
    F: Fn() -> DateTime<Utc>,
{
    if let Ok(wait) = (handle.due - clock()).to_std() {
        debug!(?wait, "waiting for completion delay");
        thread::sleep(wait);
    }

    let mut items = open_items(store)?;
    let committed = tracker.commit_due(&mut items, clock().max(handle.due));
    if committed.is_empty() {
        if items.contains(&handle.id) {
            debug!(id = %handle.id, "scheduled item was already completed");
        } else {
            warn!(id = %handle.id, "scheduled item no longer exists");
        }
        return Ok(committed);
    }
    save_items(store, &items)?;
    Ok(committed)
}

fn cmd_delete(store: &DataStore, prefix: &str) -> anyhow::Result<()> {
    info!("command delete");
    let mut items = open_items(store)?;
    let id = resolve_item_id(&items, prefix)?;
    let removed = items
        .remove(&id)
        .ok_or_else(|| anyhow!("no item matches id '{prefix}'"))?;
    save_items(store, &items)?;
    println!("Deleted item {} '{}'.", short_id(&id), removed.summary);
    Ok(())
}

#[instrument(skip(store, renderer, sub))]
fn cmd_filter(
    store: &DataStore,
    renderer: &mut Renderer,
    sub: FilterCommand,
) -> anyhow::Result<()> {
    let mut saved = store.load_filters()?;

    match sub {
        FilterCommand::Add {
            field,
            operator,
            value,
        } => {
            let filter = build_filter(&field, &operator, &value)?;
            let description = filter.describe();
            let id = saved.add_to_active(filter)?;
            store.save_filters(&saved)?;
            println!("Added filter {} ({description}).", short_id(&id));
        }
        FilterCommand::Edit {
            id,
            field,
            operator,
            value,
        } => {
            let id = resolve_filter_id(saved.active(), &id)?;
            let mut filter = build_filter(&field, &operator, &value)?;
            filter.id = id.clone();
            if !saved.edit_in_active(filter)? {
                return Err(anyhow!("no filter matches id '{id}'"));
            }
            store.save_filters(&saved)?;
            println!("Updated filter {}.", short_id(&id));
        }
        FilterCommand::Remove { id } => {
            let id = resolve_filter_id(saved.active(), &id)?;
            saved.remove_from_active(&id);
            store.save_filters(&saved)?;
            println!("Removed filter {}.", short_id(&id));
        }
        FilterCommand::Clear => {
            saved.clear_active();
            store.save_filters(&saved)?;
            println!("Active filters cleared.");
        }
        FilterCommand::Show { name } => {
            let set = match name.as_deref() {
                Some(name) => saved
                    .get(name)
                    .ok_or_else(|| FilterError::UnknownSet(name.to_string()))?,
                None => saved.active(),
            };
            renderer.print_filter_set(set)?;
        }
        FilterCommand::Save { name } => {
            let used = saved.save_active_as(&name)?;
            store.save_filters(&saved)?;
            println!("Saved active filters as '{used}'.");
        }
        FilterCommand::Load { name } => {
            saved.load(&name)?;
            store.save_filters(&saved)?;
            println!("Loaded filter set '{name}'.");
        }
        FilterCommand::Delete { name } => {
            if !saved.remove_saved(&name)? {
                return Err(FilterError::UnknownSet(name).into());
            }
            store.save_filters(&saved)?;
            println!("Deleted filter set '{name}'.");
        }
        FilterCommand::Saved => {
            renderer.print_lines(saved.names())?;
        }
    }
    Ok(())
}

fn cmd_import(store: &DataStore, path: &Path) -> anyhow::Result<()> {
    info!(path = %path.display(), "command import");
    let imported = import_file(path)?;
    let mut items = open_items(store)?;
    let count = items.merge(imported);
    save_items(store, &items)?;
    println!("Imported {count} item(s).");
    Ok(())
}

fn cmd_export(store: &DataStore, target: Option<&Path>) -> anyhow::Result<()> {
    info!("command export");
    let target = match target {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir().context("failed to read current directory")?,
    };
    let items = store.load_items()?;
    let written = store.export_to(&items, &target)?;
    println!("Exported {} item(s) to {}.", items.len(), written.display());
    Ok(())
}
