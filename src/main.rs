use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use recon_core::config::AppConfig;
use recon_core::logging::init_logging;
use recon_core::{Clock, SystemClock};
use recon_dispatcher::Coordinator;
use recon_infrastructure::create_repositories;
use recon_worker::{default_scanners, LocalNodeClient, NodeAgent};
use tokio::signal;
use tracing::{error, info, warn};

mod shutdown;

use shutdown::ShutdownManager;

/// 运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AppMode {
    /// 只运行协调进程
    Coordinator,
    /// 协调进程加本地执行节点
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("recon-scheduler")
        .version(env!("CARGO_PKG_VERSION"))
        .about("分布式安全扫描任务调度与节点编排系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时依次查找 config/recon.toml、recon.toml"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["coordinator", "all"])
                .default_value("all"),
        )
        .arg(
            Arg::new("node-name")
                .long("node-name")
                .value_name("NAME")
                .help("本地执行节点名称，缺省为主机名"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .arg(
            Arg::new("check-config")
                .long("check-config")
                .help("只校验配置并打印生效值")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = match AppConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("加载配置失败: {e:#}");
            return Err(e);
        }
    };

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }

    let mode = match matches.get_one::<String>("mode").map(String::as_str) {
        Some("coordinator") => AppMode::Coordinator,
        _ => AppMode::All,
    };
    if mode == AppMode::All {
        config.worker.enabled = true;
    }
    if let Some(name) = matches.get_one::<String>("node-name") {
        config.worker.node_name = name.clone();
    } else if config.worker.node_name == recon_core::config::WorkerConfig::default().node_name {
        if let Ok(host) = hostname::get() {
            config.worker.node_name = host.to_string_lossy().into_owned();
        }
    }
    config.validate()?;

    if matches.get_flag("check-config") {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    )?;

    info!("启动分布式安全扫描调度系统");
    info!("运行模式: {:?}", mode);
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    if config.observability.metrics_enabled {
        install_metrics_exporter(&config.observability.metrics_bind_address)?;
    }

    let shutdown_manager = ShutdownManager::new();
    let app = Application::start(config).await?;

    let mut shutdown_rx = shutdown_manager.subscribe().await;
    let signal_manager = shutdown_manager.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("收到关闭信号，开始优雅关闭...");
        signal_manager.shutdown().await;
    });

    let _ = shutdown_rx.recv().await;

    match tokio::time::timeout(Duration::from_secs(30), app.stop()).await {
        Ok(()) => info!("系统已优雅关闭"),
        Err(_) => warn!("关闭超时，强制退出"),
    }

    info!("分布式安全扫描调度系统已退出");
    Ok(())
}

/// 运行中的协调进程及可选的本地执行节点
struct Application {
    coordinator: Arc<Coordinator>,
    local_node: Option<Arc<NodeAgent>>,
    background: Vec<tokio::task::JoinHandle<()>>,
}

impl Application {
    async fn start(config: AppConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let repositories = create_repositories(&config.database)
            .await
            .with_context(|| format!("初始化存储失败: {}", config.database.url))?;

        let node_client = Arc::new(LocalNodeClient::new());
        let coordinator = Arc::new(Coordinator::new(
            &config,
            repositories,
            node_client.clone(),
            Arc::clone(&clock),
        ));

        let report = coordinator.recover().await.context("恢复调度状态失败")?;
        info!(
            "状态恢复完成: 节点 {}, 重新入队 {}, 延后入队 {}, 孤儿任务 {}",
            report.nodes_loaded, report.requeued, report.deferred, report.orphaned
        );

        let background = coordinator.spawn_background();

        let local_node = if config.worker.enabled {
            let agent = Arc::new(NodeAgent::new(
                &config.worker,
                Duration::from_secs(config.node.heartbeat_interval),
                coordinator.clone(),
                default_scanners(),
                clock,
            ));
            let (node_id, role) = agent.start().await.context("启动本地执行节点失败")?;
            node_client.attach(agent.clone()).await?;
            info!("本地执行节点已就绪: {} ({:?})", node_id, role);
            Some(agent)
        } else {
            info!("未启用本地执行节点");
            None
        };

        Ok(Self {
            coordinator,
            local_node,
            background,
        })
    }

    async fn stop(self) {
        if let Some(agent) = &self.local_node {
            agent.stop().await;
        }
        self.coordinator.shutdown().await;

        for handle in self.background {
            if let Err(e) = handle.await {
                error!("后台任务退出异常: {e}");
            }
        }

        match self.coordinator.stats().await {
            Ok(stats) => info!(
                "退出时队列长度: {}, 执行中任务: {}",
                stats.tasks.queue_length, stats.tasks.in_flight
            ),
            Err(e) => warn!("读取调度统计失败: {e}"),
        }
    }
}

fn install_metrics_exporter(bind_address: &str) -> Result<()> {
    let addr: SocketAddr = bind_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {bind_address}"))?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("安装Prometheus导出器失败: {e}"))?;
    info!("Prometheus指标导出已启用: {addr}");
    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
