// FleetConsole/src/table.rs

//! 数据表格引擎：列配置、排序、过滤、分页与列可见性。
//!
//! 表格本身不持有数据，`apply` 对调用方给出的行做一次过滤、排序和分页。
//! 每页条数与隐藏列保存在偏好设置中，键为 `table.<表格 ID>`。

use common_models::ws_payloads::{LocationRecord, SubscriberRecord};
use log::debug;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::error::ConsoleError;
use crate::preferences::PreferenceStore;

/// 默认每页条数。
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// 可以在表格中展示的行。
pub trait TableRow {
    /// 指定列的单元格文本。未知列返回 `None`。
    fn cell(&self, column_id: &str) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnConfig {
    pub id: String,
    pub label: String,
    pub sortable: bool,
    pub visible_by_default: bool,
}

impl ColumnConfig {
    pub fn new(id: &str, label: &str) -> Self {
        Self { id: id.to_string(), label: label.to_string(), sortable: true, visible_by_default: true }
    }

    pub fn unsortable(mut self) -> Self {
        self.sortable = false;
        self
    }

    pub fn hidden_by_default(mut self) -> Self {
        self.visible_by_default = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// 持久化的表格偏好。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TablePreferences {
    pub page_size: Option<usize>,
    pub hidden_columns: BTreeSet<String>,
}

/// `apply` 的结果。
#[derive(Debug)]
pub struct TablePage<'a, R> {
    pub rows: Vec<&'a R>,
    /// 过滤后的总行数。
    pub total: usize,
    /// 实际使用的页码 (超出范围时被夹到最后一页)。
    pub page_index: usize,
    pub page_count: usize,
}

#[derive(Debug, Clone)]
pub struct DataTable {
    id: String,
    columns: Vec<ColumnConfig>,
    sort: Option<(String, SortDirection)>,
    filter: String,
    page_index: usize,
    page_size: usize,
    hidden: BTreeSet<String>,
}

impl DataTable {
    pub fn new(id: &str, columns: Vec<ColumnConfig>) -> Self {
        let hidden = columns.iter().filter(|c| !c.visible_by_default).map(|c| c.id.clone()).collect();
        Self {
            id: id.to_string(),
            columns,
            sort: None,
            filter: String::new(),
            page_index: 0,
            page_size: DEFAULT_PAGE_SIZE,
            hidden,
        }
    }

    fn preference_key(&self) -> String {
        format!("table.{}", self.id)
    }

    /// 从偏好设置恢复每页条数与隐藏列。未知列被忽略。
    pub fn load_preferences(&mut self, store: &PreferenceStore) {
        let Some(prefs) = store.get::<TablePreferences>(&self.preference_key()) else {
            return;
        };
        if let Some(size) = prefs.page_size {
            self.page_size = size.max(1);
        }
        self.hidden = prefs
            .hidden_columns
            .into_iter()
            .filter(|id| self.columns.iter().any(|c| &c.id == id))
            .collect();
        debug!("[表格] 表格 '{}' 已恢复偏好设置。", self.id);
    }

    pub fn save_preferences(&self, store: &PreferenceStore) -> Result<(), ConsoleError> {
        let prefs = TablePreferences { page_size: Some(self.page_size), hidden_columns: self.hidden.clone() };
        store.set(&self.preference_key(), &prefs)
    }

    pub fn columns(&self) -> &[ColumnConfig] {
        &self.columns
    }

    pub fn visible_columns(&self) -> Vec<&ColumnConfig> {
        self.columns.iter().filter(|c| !self.hidden.contains(&c.id)).collect()
    }

    /// 设置列的可见性。未知列返回 `false`。
    pub fn set_column_visible(&mut self, column_id: &str, visible: bool) -> bool {
        if !self.columns.iter().any(|c| c.id == column_id) {
            return false;
        }
        if visible {
            self.hidden.remove(column_id);
        } else {
            self.hidden.insert(column_id.to_string());
        }
        true
    }

    pub fn sort(&self) -> Option<(&str, SortDirection)> {
        self.sort.as_ref().map(|(id, dir)| (id.as_str(), *dir))
    }

    /// 点击列头：未排序或按其他列排序时改为按该列升序，已按该列升序时改为降序，
    /// 已降序时取消排序。不可排序或未知的列返回 `false`。
    pub fn toggle_sort(&mut self, column_id: &str) -> bool {
        if !self.columns.iter().any(|c| c.id == column_id && c.sortable) {
            return false;
        }
        self.sort = match self.sort.take() {
            Some((id, SortDirection::Ascending)) if id == column_id => Some((id, SortDirection::Descending)),
            Some((id, SortDirection::Descending)) if id == column_id => None,
            _ => Some((column_id.to_string(), SortDirection::Ascending)),
        };
        true
    }

    /// 设置过滤文本并回到第一页。
    pub fn set_filter(&mut self, filter: &str) {
        self.filter = filter.trim().to_lowercase();
        self.page_index = 0;
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// 设置每页条数 (至少为 1) 并回到第一页。
    pub fn set_page_size(&mut self, page_size: usize) {
        self.page_size = page_size.max(1);
        self.page_index = 0;
    }

    pub fn set_page(&mut self, page_index: usize) {
        self.page_index = page_index;
    }

    fn matches_filter<R: TableRow>(&self, row: &R) -> bool {
        self.filter.is_empty()
            || self
                .visible_columns()
                .iter()
                .filter_map(|c| row.cell(&c.id))
                .any(|text| text.to_lowercase().contains(&self.filter))
    }

    /// 对行做过滤、排序与分页。
    pub fn apply<'a, R: TableRow>(&self, rows: &'a [R]) -> TablePage<'a, R> {
        let mut filtered: Vec<&R> = rows.iter().filter(|row| self.matches_filter(*row)).collect();

        if let Some((column_id, direction)) = &self.sort {
            filtered.sort_by(|a, b| {
                let ordering = compare_cells(a.cell(column_id), b.cell(column_id));
                match direction {
                    SortDirection::Ascending => ordering,
                    SortDirection::Descending => ordering.reverse(),
                }
            });
        }

        let total = filtered.len();
        let page_count = total.div_ceil(self.page_size).max(1);
        let page_index = self.page_index.min(page_count - 1);
        let rows = filtered.into_iter().skip(page_index * self.page_size).take(self.page_size).collect();
        TablePage { rows, total, page_index, page_count }
    }
}

/// 两个单元格都能解析为数字时按数值比较，否则按不区分大小写的文本比较。空单元格排在最后。
fn compare_cells(a: Option<String>, b: Option<String>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => match (a.parse::<f64>(), b.parse::<f64>()) {
            (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => a.to_lowercase().cmp(&b.to_lowercase()),
        },
    }
}

impl TableRow for String {
    fn cell(&self, column_id: &str) -> Option<String> {
        (column_id == "serialNumber").then(|| self.clone())
    }
}

impl TableRow for SubscriberRecord {
    fn cell(&self, column_id: &str) -> Option<String> {
        match column_id {
            "id" => Some(self.id.clone()),
            "name" => Some(self.name.clone()),
            "email" => Some(self.email.clone()),
            _ => None,
        }
    }
}

impl TableRow for LocationRecord {
    fn cell(&self, column_id: &str) -> Option<String> {
        match column_id {
            "address" => Some(self.address.clone()),
            "latitude" => self.latitude.map(|v| v.to_string()),
            "longitude" => self.longitude.map(|v| v.to_string()),
            _ => None,
        }
    }
}
