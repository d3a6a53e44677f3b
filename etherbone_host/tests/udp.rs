use std::sync::{Arc, Mutex};

use etherbone_host::sim::{DeviceLayout, SimDevice, serve_udp};
use etherbone_host::{
    Access, AccessMode, BusEngine, EngineConfig, EtherboneEngine, NetConnector, NetworkTarget,
    Proto, Timeout,
};
use etherbone_wire::DataWidth;

fn spawn_sim() -> (u16, Arc<Mutex<SimDevice>>) {
    let device = Arc::new(Mutex::new(
        SimDevice::builder()
            .device(DeviceLayout::new("RAM", 0x2000, 0x100))
            .build(),
    ));
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.set_nonblocking(true).unwrap();
    let port = socket.local_addr().unwrap().port();
    let shared = device.clone();
    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async move {
            let socket = tokio::net::UdpSocket::from_std(socket).unwrap();
            serve_udp(socket, shared).await
        })
    });
    (port, device)
}

#[test]
fn udp_round_trip() {
    let (port, device) = spawn_sim();
    let target = NetworkTarget::new(Proto::Udp, "127.0.0.1").with_port(port);
    let mut engine = EtherboneEngine::new(NetConnector::new().unwrap()).with_config(EngineConfig {
        timeout: Timeout::Millis(2_000),
        ..Default::default()
    });

    let write = Access::new(0x2010)
        .with_mode(AccessMode::Write)
        .with_value(0x600D_CAFE)
        .with_target(target.clone());
    engine.write(&write).unwrap();

    let read = Access::new(0x2012)
        .with_mode(AccessMode::Read)
        .with_align(DataWidth::W16)
        .with_target(target.clone());
    assert_eq!(engine.read(&read).unwrap(), 0xCAFE);

    let nodes = engine.scan_topology(&target).unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].path_id(), "1");

    let dev = device.lock().unwrap();
    assert_eq!(dev.peek(0x2010, 4).unwrap(), vec![0x60, 0x0D, 0xCA, 0xFE]);
    assert!(dev.probes() >= 3);
}
