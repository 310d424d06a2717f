use anyhow::{Context, Result};
use toml_edit::{Item, Table, TableLike, Value};

pub(crate) fn implicit_table() -> Table {
    let mut table = Table::new();
    table.set_implicit(true);
    table
}

pub(crate) fn table_like<'a>(root: &'a Table, path: &[&str]) -> Option<&'a dyn TableLike> {
    let mut current: &dyn TableLike = root;
    for key in path {
        current = current.get(key)?.as_table_like()?;
    }
    Some(current)
}

/// Walk `path`, creating implicit tables and promoting inline tables on the way.
pub(crate) fn ensure_table<'a>(root: &'a mut Table, path: &[&str]) -> Result<&'a mut Table> {
    let mut current = root;
    for key in path {
        let item = current.entry(key).or_insert(Item::Table(implicit_table()));
        if let Some(inline) = item.as_inline_table() {
            *item = Item::Table(inline.clone().into_table());
        }
        current = item
            .as_table_mut()
            .with_context(|| format!("`{key}` must be a table"))?;
    }
    Ok(current)
}

pub(crate) fn table_mut<'a>(root: &'a mut Table, path: &[&str]) -> Option<&'a mut Table> {
    let mut current = root;
    for key in path {
        current = current.get_mut(key)?.as_table_mut()?;
    }
    Some(current)
}

pub(crate) fn str_field(table: &dyn TableLike, key: &str) -> Option<String> {
    table
        .get(key)
        .and_then(Item::as_str)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn bool_field(table: &dyn TableLike, key: &str) -> Option<bool> {
    table.get(key).and_then(Item::as_bool)
}

pub(crate) fn string_list(item: Option<&Item>) -> Vec<String> {
    item.and_then(Item::as_array)
        .map(|array| {
            array
                .iter()
                .filter_map(Value::as_str)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Entries of an array of tables or an array of inline tables.
pub(crate) fn table_list(item: Option<&Item>) -> Vec<&dyn TableLike> {
    let Some(item) = item else {
        return Vec::new();
    };
    if let Some(tables) = item.as_array_of_tables() {
        return tables.iter().map(|table| table as &dyn TableLike).collect();
    }
    item.as_array()
        .map(|array| {
            array
                .iter()
                .filter_map(Value::as_inline_table)
                .map(|table| table as &dyn TableLike)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn set_string(table: &mut Table, key: &str, value: Option<&str>) {
    match value {
        Some(value) => {
            if table.get(key).and_then(Item::as_str) != Some(value) {
                table.insert(key, toml_edit::value(value));
            }
        }
        None => {
            table.remove(key);
        }
    }
}

pub(crate) fn string_array<'a>(values: impl IntoIterator<Item = &'a str>) -> Value {
    let array: toml_edit::Array = values.into_iter().collect();
    Value::Array(array)
}

pub(crate) fn remove_if_empty(table: &mut Table, key: &str) {
    let empty = table
        .get(key)
        .and_then(Item::as_table_like)
        .is_some_and(|table| table.is_empty());
    if empty {
        table.remove(key);
    }
}
