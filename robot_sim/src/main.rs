use anyhow::Context;
use log::{info, LevelFilter};
use robot_sim::config::SimConfig;
use robot_sim::SimRobot;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_millis()
        .init();
    info!("[主程序] 日志系统已初始化 (env_logger)，默认级别: Info。");

    let config = SimConfig::from_env();
    let robot = SimRobot::start(&config)
        .await
        .with_context(|| format!("启动模拟机器人失败 ({})", config.listen_addr))?;
    info!("[主程序] 模拟机器人已就绪: {}，按 Ctrl-C 退出。", robot.url());

    tokio::signal::ctrl_c().await.context("等待 Ctrl-C 信号失败")?;
    info!(
        "[主程序] 正在退出。本次共收到 {} 帧，最后确认的运行模式: {:?}",
        robot.received().len(),
        robot.current_mode()
    );
    Ok(())
}
