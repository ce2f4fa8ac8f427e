use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod api;
mod config;
mod content;
mod error;
mod repository;
mod state;

#[derive(Parser)]
#[command(name = "nextblog", about = "Rust 博客后端：文章 / 评论 / 商城 API", version = long_version())]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// 启动 API 服务
    Serve {
        /// 项目根目录（默认当前目录）
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// 监听地址
        #[arg(long)]
        host: Option<String>,

        /// 监听端口
        #[arg(long)]
        port: Option<u16>,
    },

    /// 创建或重置管理员账号
    InitAdmin {
        /// 项目根目录（默认当前目录）
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        #[arg(long)]
        username: String,

        #[arg(long)]
        password: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // None 等同于 Serve { root: ".", host: None, port: None }
    let command = cli.command.unwrap_or(Commands::Serve {
        root: PathBuf::from("."),
        host: None,
        port: None,
    });

    // 使用配置中的日志级别作为默认值
    let default_level = match &command {
        Commands::Serve { root, .. } | Commands::InitAdmin { root, .. } => {
            config::BlogConfig::load(&root.canonicalize().unwrap_or_else(|_| root.clone()))
                .ok()
                .map(|c| c.server.log_level.clone())
        }
    };
    let default_level = default_level.as_deref().unwrap_or("info");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    match command {
        Commands::Serve { root, host, port } => {
            let root = root.canonicalize()?;
            let config = config::BlogConfig::load(&root)?;

            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);

            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(async move { run_server(root, config, &host, port).await })?;
        }
        Commands::InitAdmin {
            root,
            username,
            password,
        } => {
            let root = root.canonicalize()?;
            let config = config::BlogConfig::load(&root)?;

            if username.chars().count() < 3 || username.chars().count() > 50 {
                anyhow::bail!("用户名长度应为 3-50 个字符");
            }
            if password.chars().count() < 6 {
                anyhow::bail!("密码至少 6 个字符");
            }

            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(async move {
                    let app_state = state::AppState::new(root, config).await?;
                    let hash = api::auth::hash_password(&password)?;
                    let users = repository::UserRepository::new(app_state.db.clone());
                    let admin = users.upsert_admin(&username, &hash).await?;
                    tracing::info!(username = %admin.username, "管理员账号已就绪");
                    anyhow::Ok(())
                })?;
        }
    }

    Ok(())
}

async fn run_server(
    root: PathBuf,
    config: config::BlogConfig,
    host: &str,
    port: u16,
) -> anyhow::Result<()> {
    let app_state = state::AppState::new(root, config).await?;
    let site_title = app_state.config.site.title.clone();
    let app = api::router(app_state);

    let addr = format!("{host}:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            tracing::error!("端口 {port} 已被占用");
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };
    tracing::info!(site = %site_title, "API 服务启动：http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}

const fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        "\ncommit:  ",
        env!("NEXTBLOG_GIT_COMMIT"),
        "\nbuild:   ",
        env!("NEXTBLOG_BUILD_TIME"),
        "\nprofile: ",
        env!("NEXTBLOG_BUILD_PROFILE"),
    )
}
