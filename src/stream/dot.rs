//! Graphviz rendering of a stream's connections
//!
//! Every connection becomes a node grouped by role, linked to a node for
//! its remote host. Producer tracks get their own nodes; consumer senders
//! draw an edge from the track they read.

use std::fmt::Write;

use super::Stream;
use crate::connection::ConnectionInfo;
use crate::media::codec::ffmpeg_name;
use crate::media::TrackInfo;

const BYTES_UNITS: &[u8] = b"KMGTP";

#[derive(Clone, Copy, PartialEq, Eq)]
enum Group {
    Producer,
    Consumer,
}

impl Group {
    fn as_str(self) -> &'static str {
        match self {
            Group::Producer => "producer",
            Group::Consumer => "consumer",
        }
    }
}

impl Stream {
    /// Append DOT statements for every live connection
    ///
    /// Only the statements are written; the caller wraps them in
    /// `digraph { ... }`.
    pub async fn append_dot(&self, dot: &mut String) {
        let (producers, consumers) = self.connections().await;

        for info in &producers {
            append_conn(dot, info, Group::Producer);
        }
        for info in &consumers {
            append_conn(dot, info, Group::Consumer);
        }
    }
}

/// `999 B`, `1.50 KB`, `2.00 MB`...
pub fn human_bytes(bytes: u64) -> String {
    if bytes < 1000 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64 / 1000.0;
    let mut unit = 0;
    while value >= 1000.0 && unit < BYTES_UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }

    format!("{value:.2} {}B", BYTES_UNITS[unit] as char)
}

fn append_conn(dot: &mut String, info: &ConnectionInfo, group: Group) {
    let host = host(info);

    let _ = writeln!(dot, "{host:?} [group=host];");
    let _ = writeln!(
        dot,
        "{} [group={}, label={:?}, title={:?}];",
        info.id,
        group.as_str(),
        info.format_name,
        label(info)
    );

    match group {
        Group::Producer => {
            let bytes = human_bytes(info.bytes_recv);
            let _ = writeln!(dot, "{host:?} -> {} [label={bytes:?}];", info.id);
        }
        Group::Consumer => {
            let bytes = human_bytes(info.bytes_send);
            let _ = writeln!(dot, "{} -> {host:?} [label={bytes:?}];", info.id);
        }
    }

    for recv in &info.receivers {
        let bytes = human_bytes(recv.bytes);
        let _ = writeln!(dot, "{} -> {} [label={bytes:?}];", info.id, recv.id);
        append_track(dot, recv);
    }

    for send in &info.senders {
        let bytes = human_bytes(send.bytes);
        let _ = writeln!(dot, "{} -> {} [label={bytes:?}];", send.parent, info.id);
    }
}

fn append_track(dot: &mut String, track: &TrackInfo) {
    let codec = &track.codec;
    let name = if codec.name.is_empty() {
        "unknown"
    } else {
        ffmpeg_name(&codec.name)
    };

    let mut title = format!("codec_name={name}");
    if codec.clock_rate != 0 && codec.clock_rate != 90000 {
        let _ = write!(title, "\nsample_rate={}", codec.clock_rate);
    }
    if codec.channels != 0 {
        let _ = write!(title, "\nchannels={}", codec.channels);
    }

    let _ = writeln!(
        dot,
        "{} [group=node, label={name:?}, title={title:?}];",
        track.id
    );
}

/// Remote host of a connection, without port
fn host(info: &ConnectionInfo) -> String {
    if info.protocol == "pipe" {
        return "127.0.0.1".to_string();
    }

    let mut s = info.remote_addr.as_str();
    if s.is_empty() {
        return "unknown".to_string();
    }

    // "1.2.3.4 forwarded 5.6.7.8"
    if let Some(i) = s.find("forwarded").filter(|&i| i > 0) {
        s = s.get(i + 10..).unwrap_or_default();
    }

    if let Some(rest) = s.strip_prefix('[') {
        if let Some(i) = rest.find(']').filter(|&i| i > 0) {
            return rest[..i].to_string();
        }
    }

    match s.find([' ', ',', ':']) {
        Some(i) if i > 0 => s[..i].to_string(),
        _ => s.to_string(),
    }
}

fn label(info: &ConnectionInfo) -> String {
    let mut label = format!("format_name={}", info.format_name);
    for (key, value) in [
        ("protocol", &info.protocol),
        ("source", &info.source),
        ("url", &info.url),
        ("user_agent", &info.user_agent),
    ] {
        if !value.is_empty() {
            let _ = write!(label, "\n{key}={value}");
        }
    }
    label
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{wants, Dialer, FakeConsumer};

    fn remote(protocol: &str, remote_addr: &str) -> ConnectionInfo {
        ConnectionInfo {
            protocol: protocol.into(),
            remote_addr: remote_addr.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(999), "999 B");
        assert_eq!(human_bytes(1500), "1.50 KB");
        assert_eq!(human_bytes(2_000_000), "2.00 MB");
        assert_eq!(human_bytes(3_210_000_000), "3.21 GB");
        assert_eq!(human_bytes(u64::MAX), "18446.74 PB");
    }

    #[test]
    fn test_host() {
        assert_eq!(host(&remote("pipe", "")), "127.0.0.1");
        assert_eq!(host(&remote("rtsp", "")), "unknown");
        assert_eq!(host(&remote("rtsp", "192.168.1.5:554")), "192.168.1.5");
        assert_eq!(host(&remote("rtsp", "[fe80::1]:8554")), "fe80::1");
        assert_eq!(
            host(&remote("http", "10.0.0.1:4000 forwarded 203.0.113.9, 10.0.0.1")),
            "203.0.113.9"
        );
        assert_eq!(host(&remote("ws", "localhost")), "localhost");
    }

    #[test]
    fn test_label() {
        let mut info = ConnectionInfo::new(1, "rtsp");
        info.url = "rtsp://cam/stream".into();
        assert_eq!(label(&info), "format_name=rtsp\nurl=rtsp://cam/stream");
    }

    #[tokio::test]
    async fn test_append_dot() {
        let dialer = Dialer::new();
        let stream = Stream::new(["fake:cam"], dialer.schemes("fake"));
        let viewer = FakeConsumer::new(wants("video"));
        stream.add_consumer(viewer.clone()).await.unwrap();

        let (producers, consumers) = stream.connections().await;
        let prod = &producers[0];
        let track = &prod.receivers[0];
        let cons = &consumers[0];

        let mut dot = String::new();
        stream.append_dot(&mut dot).await;

        assert!(dot.contains("\"10.0.0.2\" [group=host];\n"));
        assert!(dot.contains(&format!(
            "{} [group=producer, label=\"fake\", title=\"format_name=fake\\nurl=fake:cam\"];\n",
            prod.id
        )));
        assert!(dot.contains(&format!("\"10.0.0.2\" -> {} [label=\"0 B\"];\n", prod.id)));
        assert!(dot.contains(&format!(
            "{} [group=node, label=\"h264\", title=\"codec_name=h264\"];\n",
            track.id
        )));
        assert!(dot.contains(&format!("{} -> {} [label=\"0 B\"];\n", track.id, cons.id)));
        assert!(dot.contains(&format!("{} -> \"192.168.1.50\" [label=\"0 B\"];\n", cons.id)));
    }
}
