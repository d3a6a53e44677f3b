use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use etherbone_host::etherbone_wire::Endianness;
use etherbone_host::sim::{BridgeLayout, DeviceLayout, SIM_VENDOR_ID, SimDevice, serve_udp};
use tokio::net::UdpSocket;
use tracing::info;

fn demo_board() -> SimDevice {
    SimDevice::builder()
        .device(DeviceLayout::new("RAM", 0x0000, 0x1000))
        .device(DeviceLayout::new("GPIO", 0x2000, 0x100).ids(SIM_VENDOR_ID, 0x35aa_6b96))
        .bridge(
            BridgeLayout::new("peripherals", 0x10000, 0x10000).device(
                DeviceLayout::new("UART", 0x200, 0x100)
                    .endian(Endianness::Little)
                    .ids(SIM_VENDOR_ID, 0xe2d1_3d04),
            ),
        )
        .record_ops(false)
        .build()
}

pub(crate) fn serve(bind: &str, port: u16) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Starting runtime")?;
    let device = Arc::new(Mutex::new(demo_board()));
    rt.block_on(async move {
        let socket = UdpSocket::bind((bind, port))
            .await
            .with_context(|| format!("Binding {bind}:{port}"))?;
        info!("Simulated board listening on {}", socket.local_addr()?);
        serve_udp(socket, device).await.context("Serving")
    })
}
