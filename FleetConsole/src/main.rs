// FleetConsole/src/main.rs

//! `fleet-console` 命令行入口。
//!
//! 子命令：
//! - `login` / `logout`：保存或清除会话令牌。
//! - `watch`：连接某个频道并持续打印设备事件 (可按设备过滤，或只看遥测)。
//! - `search-serial` / `search-subscriber` / `search-location`：执行一次搜索并以表格形式打印结果。

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use common_models::enums::{ChannelKind, ConnectionState};
use fleet_console::config::{default_config_path, load_console_config, ConfigSource, ConsoleConfig};
use fleet_console::live::{DeviceEventFeed, FeedUpdate, TelemetryFeed, TimedEvent};
use fleet_console::preferences::PreferenceStore;
use fleet_console::search::{DebouncedSearch, LocationSearch, SearchKind, SerialNumberSearch, SubscriberSearch};
use fleet_console::table::{ColumnConfig, DataTable, TableRow};
use fleet_console::validation::is_serial_number;
use fleet_console::ws_client::{ChannelConnection, ConnectionContext};
use log::{info, LevelFilter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REPLY_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Parser, Debug)]
#[command(name = "fleet-console", version, about = "无线网络设备管理控制台")]
struct Cli {
    /// 配置文件路径，默认为 ./config/fleet_console.json
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// 本次使用的会话令牌，不指定时使用已保存的令牌
    #[arg(long)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 保存会话令牌
    Login { token: String },
    /// 清除已保存的会话令牌
    Logout,
    /// 持续打印某个频道上的设备事件
    Watch {
        #[arg(long, default_value = "controller", value_parser = parse_channel)]
        channel: ChannelKind,
        /// 只显示该序列号的设备事件 (12 位十六进制)
        #[arg(long, value_parser = parse_serial)]
        serial: Option<String>,
        /// 只显示遥测与统计事件 (需要同时指定 --serial)
        #[arg(long, requires = "serial")]
        telemetry: bool,
    },
    /// 按前缀搜索设备序列号
    SearchSerial {
        prefix: String,
        #[arg(long, default_value_t = 0)]
        page: usize,
    },
    /// 按邮箱或名称搜索订阅者
    SearchSubscriber {
        query: String,
        #[arg(long, default_value_t = 0)]
        page: usize,
    },
    /// 地址补全
    SearchLocation {
        query: String,
        #[arg(long, default_value_t = 0)]
        page: usize,
    },
}

fn parse_channel(value: &str) -> Result<ChannelKind, String> {
    ChannelKind::ALL
        .into_iter()
        .find(|kind| kind.as_str().eq_ignore_ascii_case(value))
        .ok_or_else(|| format!("未知的频道 '{}'，可选值: controller, provisioning, firmware, security", value))
}

fn parse_serial(value: &str) -> Result<String, String> {
    if is_serial_number(value) {
        Ok(value.to_ascii_lowercase())
    } else {
        Err(format!("'{}' 不是有效的设备序列号 (应为 12 位十六进制字符)", value))
    }
}

fn init_logger(config: &ConsoleConfig) {
    let level = config.log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);
    // RUST_LOG 环境变量优先于配置文件中的级别
    if let Err(e) = env_logger::Builder::new().filter_level(level).parse_default_env().try_init() {
        eprintln!("初始化 env_logger 日志服务失败: {}", e);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let (config, source) = load_console_config(&config_path).context("加载控制台配置失败")?;
    init_logger(&config);
    info!("控制台 (fleet-console) 正在启动，配置文件: {}", config_path.display());
    if source == ConfigSource::CreatedDefault {
        info!("[配置模块] 配置文件 '{}' 不存在，已写入默认配置。", config_path.display());
    }

    let preferences = PreferenceStore::open(&config.preferences_path).context("打开偏好设置失败")?;

    match &cli.command {
        Command::Login { token } => {
            preferences.set_session_token(token)?;
            println!("会话令牌已保存。");
            return Ok(());
        }
        Command::Logout => {
            preferences.clear_session_token()?;
            println!("会话令牌已清除。");
            return Ok(());
        }
        _ => {}
    }

    let context = ConnectionContext::new(&config);
    context.set_token(cli.token.clone().or_else(|| preferences.session_token()));

    let result = match cli.command {
        Command::Watch { channel, serial, telemetry } => watch(&context, channel, serial, telemetry).await,
        Command::SearchSerial { prefix, page } => {
            let rows = run_search::<SerialNumberSearch>(&context, &config, &prefix).await;
            let table = DataTable::new("serial_numbers", vec![ColumnConfig::new("serialNumber", "序列号")]);
            rows.map(|rows| print_table(table, &rows, page, &preferences))
        }
        Command::SearchSubscriber { query, page } => {
            let rows = run_search::<SubscriberSearch>(&context, &config, &query).await;
            let table = DataTable::new(
                "subscribers",
                vec![
                    ColumnConfig::new("name", "名称"),
                    ColumnConfig::new("email", "邮箱"),
                    ColumnConfig::new("id", "ID").hidden_by_default(),
                ],
            );
            rows.map(|rows| print_table(table, &rows, page, &preferences))
        }
        Command::SearchLocation { query, page } => {
            let rows = run_search::<LocationSearch>(&context, &config, &query).await;
            let table = DataTable::new(
                "locations",
                vec![
                    ColumnConfig::new("address", "地址").unsortable(),
                    ColumnConfig::new("latitude", "纬度"),
                    ColumnConfig::new("longitude", "经度"),
                ],
            );
            rows.map(|rows| print_table(table, &rows, page, &preferences))
        }
        Command::Login { .. } | Command::Logout => Ok(()),
    };

    context.close_all().await;
    result
}

/// 等待频道结束 `connecting` 状态，连接失败时报错。
async fn wait_until_open(channel: &ChannelConnection) -> anyhow::Result<()> {
    let mut state_rx = channel.watch_state();
    let state = {
        let state = timeout(CONNECT_TIMEOUT, state_rx.wait_for(|s| *s != ConnectionState::Connecting))
            .await
            .with_context(|| format!("连接频道 {} 超时", channel.kind()))?
            .context("连接状态通道已关闭")?;
        *state
    };
    if state != ConnectionState::Open {
        bail!("无法连接频道 {} ({})", channel.kind(), channel.endpoint());
    }
    Ok(())
}

async fn run_search<K: SearchKind>(
    context: &Arc<ConnectionContext>,
    config: &ConsoleConfig,
    query: &str,
) -> anyhow::Result<Vec<K::Item>> {
    let search = DebouncedSearch::<K>::new(Arc::clone(context), &config.search);
    search.focus()?;
    wait_until_open(&context.channel(K::CHANNEL)).await?;

    match timeout(REPLY_TIMEOUT, search.run_query(query)).await.context("等待搜索结果超时")? {
        Some(results) => Ok(results),
        None => bail!("'{}' 的搜索没有结果：输入过短或格式不正确、回复无法解析，或连接已断开", query),
    }
}

fn print_table<R: TableRow>(mut table: DataTable, rows: &[R], page: usize, preferences: &PreferenceStore) {
    table.load_preferences(preferences);
    table.set_page(page);
    let page = table.apply(rows);
    let columns = table.visible_columns();

    println!("{}", columns.iter().map(|c| c.label.as_str()).collect::<Vec<_>>().join("\t"));
    for row in &page.rows {
        let cells: Vec<String> = columns.iter().map(|c| row.cell(&c.id).unwrap_or_default()).collect();
        println!("{}", cells.join("\t"));
    }
    println!("-- 第 {}/{} 页，共 {} 条 --", page.page_index + 1, page.page_count, page.total);
}

fn print_event(event: &TimedEvent) {
    println!("{} {:?}", event.received_at.to_rfc3339(), event.event);
}

async fn watch(
    context: &Arc<ConnectionContext>,
    kind: ChannelKind,
    serial: Option<String>,
    telemetry: bool,
) -> anyhow::Result<()> {
    let channel = context.channel(kind);
    context.start(kind)?;
    wait_until_open(&channel).await?;
    info!("正在监听频道 {} 上的设备事件，按 Ctrl+C 退出。", kind);

    match (serial, telemetry) {
        (Some(serial), true) => {
            let mut feed = TelemetryFeed::new(&channel, &serial);
            loop {
                tokio::select! {
                    update = feed.next_update() => {
                        if !print_update(kind, update)? {
                            break;
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
        (serial, _) => {
            let mut feed = match serial {
                Some(serial) => DeviceEventFeed::for_device(&channel, &serial),
                None => DeviceEventFeed::all(&channel),
            };
            loop {
                tokio::select! {
                    update = feed.next_update() => {
                        if !print_update(kind, update)? {
                            break;
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
    }
    Ok(())
}

/// 打印一条推送结果。返回 `false` 表示推送已结束。
fn print_update(kind: ChannelKind, update: FeedUpdate) -> anyhow::Result<bool> {
    match update {
        FeedUpdate::Event(event) => {
            print_event(&event);
            Ok(true)
        }
        FeedUpdate::Ended => Ok(false),
        FeedUpdate::Disconnected => bail!("频道 {} 的连接已断开", kind),
    }
}
