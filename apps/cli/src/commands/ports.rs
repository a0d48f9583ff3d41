//! 串口枚举命令

use anyhow::{Context, Result};
use oxilog_serial::list_ports;

pub fn execute() -> Result<()> {
    let ports = list_ports().context("failed to enumerate serial ports")?;

    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }

    let width = ports.iter().map(|p| p.name.len()).max().unwrap_or(0);
    for port in &ports {
        println!("{:<width$}  {}", port.name, port.description(), width = width);
    }
    Ok(())
}
