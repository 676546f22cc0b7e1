// FleetConsole/src/search/mod.rs

//! 搜索框背后的防抖查询：序列号、订阅者与地址补全。

pub mod debounce;
pub mod kinds;
pub mod query;

pub use kinds::{LocationSearch, SearchKind, SerialNumberSearch, SubscriberSearch};
pub use query::{DebouncedSearch, SearchPhase, SearchState};

/// 序列号搜索框。
pub type SerialNumberSearchBox = DebouncedSearch<SerialNumberSearch>;
/// 订阅者搜索框。
pub type SubscriberSearchBox = DebouncedSearch<SubscriberSearch>;
/// 地址补全搜索框。
pub type LocationSearchBox = DebouncedSearch<LocationSearch>;
