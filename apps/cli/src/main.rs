use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;

use urbaneye_core_sdk::prelude::*;

/**
 * \brief CLI 程序入口：本地服务、函数事件调用与单次提问。
 */
#[derive(Parser, Debug)]
#[command(name = "urbaneye-relay", version, about = "UrbanEye chat relay")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 启动本地 HTTP 服务，所有路径均由中继处理。
     */
    Serve {
        #[arg(long, default_value = "127.0.0.1:8888")]
        addr: String,
    },

    /**
     * \brief 读取函数事件 JSON（文件或 stdin），输出函数结果 JSON。
     */
    Invoke {
        #[arg(long)]
        event: Option<PathBuf>,
    },

    /**
     * \brief 发送一条用户消息并打印回复。
     * \param history 可选的历史消息 JSON 数组文件
     */
    Ask {
        #[arg(long)]
        prompt: String,
        #[arg(long)]
        history: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init()?;

    let relay = Relay::from_env().context("load relay configuration failed")?;

    match cli.command {
        Commands::Serve { addr } => {
            server::run(&addr, relay).await?;
        }
        Commands::Invoke { event } => {
            let raw = match event {
                Some(path) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("read event {} failed", path.display()))?,
                None => {
                    let mut buf = String::new();
                    tokio::io::stdin()
                        .read_to_string(&mut buf)
                        .await
                        .context("read event from stdin failed")?;
                    buf
                }
            };
            let event: FunctionEvent =
                serde_json::from_str(&raw).context("parse function event failed")?;
            let result = function::invoke(&relay, &event).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Ask { prompt, history } => {
            let mut messages = match history {
                Some(path) => {
                    let raw = tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("read history {} failed", path.display()))?;
                    let v: Value =
                        serde_json::from_str(&raw).context("parse history failed")?;
                    match v {
                        Value::Array(items) => items,
                        _ => bail!("history file must contain a JSON array of messages"),
                    }
                }
                None => Vec::new(),
            };
            messages.push(json!({ "role": "user", "content": prompt }));

            let body = json!({ "messages": messages }).to_string();
            let resp = relay.handle(RelayRequest::post(body)).await;
            match resp.reply() {
                Some(reply) => println!("{}", reply.reply),
                None => bail!(
                    "relay failed ({}): {}",
                    resp.status,
                    resp.body.unwrap_or_default()
                ),
            }
        }
    }

    Ok(())
}
