use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

/// Lowest port handed out automatically; the scan wraps back here from 65535.
pub const PORT_RANGE_START: u16 = 3000;
pub const PORT_RANGE_END: u16 = 65535;

/// Enumerates ports that something on this machine is already bound to.
#[async_trait]
pub trait ListenerProbe: Send + Sync {
    /// `None` when no enumeration mechanism is available on this system.
    async fn listening_ports(&self) -> Option<HashSet<u16>>;
}

/// Reads the kernel socket tables through procfs, falling back to `ss -Htuln`.
#[derive(Debug, Clone, Copy)]
pub struct SystemProbe {
    timeout: Duration,
}

impl SystemProbe {
    /// `timeout` bounds each enumeration attempt.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ListenerProbe for SystemProbe {
    async fn listening_ports(&self) -> Option<HashSet<u16>> {
        let proc_net = tokio::task::spawn_blocking(read_proc_net);
        match tokio::time::timeout(self.timeout, proc_net).await {
            Ok(Ok(Some(ports))) => return Some(ports),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "procfs reader panicked"),
            Err(_) => tracing::warn!(timeout = ?self.timeout, "reading procfs socket tables timed out"),
        }
        read_ss("ss", self.timeout).await
    }
}

/// Listening TCP and bound UDP ports from `/proc/net/{tcp,tcp6,udp,udp6}`.
#[cfg(target_os = "linux")]
fn read_proc_net() -> Option<HashSet<u16>> {
    use procfs::net::TcpState;

    let mut ports = HashSet::new();
    let mut readable = false;
    for table in [procfs::net::tcp(), procfs::net::tcp6()] {
        match table {
            Ok(entries) => {
                readable = true;
                ports.extend(
                    entries
                        .iter()
                        .filter(|entry| matches!(entry.state, TcpState::Listen))
                        .map(|entry| entry.local_address.port()),
                );
            }
            Err(e) => tracing::debug!(error = %e, "tcp table unreadable"),
        }
    }
    for table in [procfs::net::udp(), procfs::net::udp6()] {
        match table {
            Ok(entries) => {
                readable = true;
                ports.extend(entries.iter().map(|entry| entry.local_address.port()));
            }
            Err(e) => tracing::debug!(error = %e, "udp table unreadable"),
        }
    }
    ports.remove(&0);
    readable.then_some(ports)
}

#[cfg(not(target_os = "linux"))]
fn read_proc_net() -> Option<HashSet<u16>> {
    None
}

async fn read_ss(program: &str, timeout: Duration) -> Option<HashSet<u16>> {
    let mut cmd = Command::new(program);
    cmd.arg("-Htuln").kill_on_drop(true);
    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            tracing::debug!(program, error = %e, "ss not available");
            return None;
        }
        Err(_) => {
            tracing::warn!(program, timeout = ?timeout, "ss did not answer in time");
            return None;
        }
    };
    if !output.status.success() {
        return None;
    }
    Some(parse_ss(&String::from_utf8_lossy(&output.stdout)))
}

/// Local ports from `ss -Htuln` output (`netid state recv-q send-q local peer`).
pub fn parse_ss(output: &str) -> HashSet<u16> {
    output
        .lines()
        .filter_map(|line| {
            let local = line.split_whitespace().nth(4)?;
            let (_, port) = local.rsplit_once(':')?;
            port.parse::<u16>().ok()
        })
        .filter(|&port| port != 0)
        .collect()
}

/// Decides port availability against the OS and a set of ports the registry
/// has already handed out.
pub struct PortAllocator {
    probe: Box<dyn ListenerProbe>,
}

impl PortAllocator {
    pub fn new(probe: impl ListenerProbe + 'static) -> Self {
        Self {
            probe: Box::new(probe),
        }
    }

    pub fn system(timeout: Duration) -> Self {
        Self::new(SystemProbe::new(timeout))
    }

    /// True iff nothing listens on `port` and no record in `reserved` owns it.
    pub async fn is_port_free(&self, port: u16, reserved: &HashSet<u16>) -> bool {
        let listening = self.snapshot().await;
        is_free(port, reserved, listening.as_ref())
    }

    /// First free port scanning upward from `start`, wrapping from 65535 to
    /// [`PORT_RANGE_START`]. Returns the normalised `start` if the scan comes
    /// back around without finding anything; the caller must re-check it.
    pub async fn find_free_port(&self, start: u32, reserved: &HashSet<u16>) -> u16 {
        let listening = self.snapshot().await;
        let start = normalize_start(start);

        let mut port = start;
        loop {
            if is_free(port, reserved, listening.as_ref()) {
                return port;
            }
            port = next_candidate(port);
            if port == start {
                tracing::warn!(start, "no free port found in the whole range");
                return start;
            }
        }
    }

    async fn snapshot(&self) -> Option<HashSet<u16>> {
        let listening = self.probe.listening_ports().await;
        if listening.is_none() {
            tracing::warn!("cannot enumerate listening sockets, treating ports as free");
        }
        listening
    }
}

fn is_free(port: u16, reserved: &HashSet<u16>, listening: Option<&HashSet<u16>>) -> bool {
    if port == 0 || reserved.contains(&port) {
        return false;
    }
    listening.map_or(true, |ports| !ports.contains(&port))
}

/// Out-of-range and low ports start the scan at [`PORT_RANGE_START`].
fn normalize_start(start: u32) -> u16 {
    match u16::try_from(start) {
        Ok(port) if port >= PORT_RANGE_START => port,
        _ => PORT_RANGE_START,
    }
}

fn next_candidate(port: u16) -> u16 {
    if port >= PORT_RANGE_END {
        PORT_RANGE_START
    } else {
        port + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticProbe;

    fn reserved(ports: &[u16]) -> HashSet<u16> {
        ports.iter().copied().collect()
    }

    #[tokio::test]
    async fn low_start_lifts_to_range_start() {
        let allocator = PortAllocator::new(StaticProbe::listening(&[]));
        assert_eq!(allocator.find_free_port(80, &HashSet::new()).await, 3000);
    }

    #[tokio::test]
    async fn skips_reserved_and_listening_ports() {
        let allocator = PortAllocator::new(StaticProbe::listening(&[3001]));
        assert_eq!(
            allocator.find_free_port(3000, &reserved(&[3000])).await,
            3002
        );
    }

    #[tokio::test]
    async fn out_of_range_start_is_substituted() {
        let allocator = PortAllocator::new(StaticProbe::listening(&[]));
        assert_eq!(allocator.find_free_port(0, &HashSet::new()).await, 3000);
        assert_eq!(allocator.find_free_port(70_000, &HashSet::new()).await, 3000);
    }

    #[tokio::test]
    async fn wraps_at_top_of_range() {
        let allocator = PortAllocator::new(StaticProbe::listening(&[65535]));
        assert_eq!(allocator.find_free_port(65535, &HashSet::new()).await, 3000);
    }

    #[tokio::test]
    async fn terminates_when_everything_is_taken() {
        let everything: Vec<u16> = (1..=u16::MAX).collect();
        let allocator = PortAllocator::new(StaticProbe::listening(&everything));
        assert_eq!(allocator.find_free_port(5000, &HashSet::new()).await, 5000);
        assert!(!allocator.is_port_free(5000, &HashSet::new()).await);
    }

    #[tokio::test]
    async fn unavailable_probe_fails_open() {
        let allocator = PortAllocator::new(StaticProbe::unavailable());
        assert!(allocator.is_port_free(8080, &HashSet::new()).await);
        assert!(!allocator.is_port_free(8080, &reserved(&[8080])).await);
    }

    #[tokio::test]
    async fn port_zero_is_never_free() {
        let allocator = PortAllocator::new(StaticProbe::unavailable());
        assert!(!allocator.is_port_free(0, &HashSet::new()).await);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn system_probe_sees_bound_sockets() {
        let tcp = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let udp = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let tcp_port = tcp.local_addr().unwrap().port();
        let udp_port = udp.local_addr().unwrap().port();

        let probe = SystemProbe::new(Duration::from_secs(5));
        let ports = probe.listening_ports().await.unwrap();
        assert!(ports.contains(&tcp_port));
        assert!(ports.contains(&udp_port));

        let allocator = PortAllocator::new(probe);
        assert!(!allocator.is_port_free(tcp_port, &HashSet::new()).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stuck_ss_gives_up_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let script = crate::testing::write_script(dir.path(), "ss", "sleep 5");

        let started = std::time::Instant::now();
        let ports = read_ss(script.to_str().unwrap(), Duration::from_millis(100)).await;
        assert!(ports.is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn missing_ss_is_unavailable() {
        assert!(read_ss("/nonexistent/ss", Duration::from_secs(1))
            .await
            .is_none());
    }

    #[test]
    fn parses_ss_output() {
        let output = "udp   UNCONN 0      0            0.0.0.0:68        0.0.0.0:*\n\
tcp   LISTEN 0      128          0.0.0.0:22        0.0.0.0:*\n\
tcp   LISTEN 0      511             [::]:3000         [::]:*\n\
tcp   LISTEN 0      4096               *:9090            *:*\n";
        assert_eq!(parse_ss(output), reserved(&[68, 22, 3000, 9090]));
    }
}
