//! Benchmarks for the spot decoders and the spot list.

use chrono::{TimeDelta, TimeZone, Utc};
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use dx_spot_feed::{
    decode::{decode_cluster_line, decode_datagram},
    geo::LatLng,
    parser::{looks_like_spot, parse_spot_line},
    prefix::{PrefixRow, PrefixTable},
    spot::SpotRecord,
    storage::SpotList,
    wsjtx::StatusBuilder,
};

/// Sample cluster lines for benchmarking.
const SAMPLE_SPOTS: &[&str] = &[
    "DX de KD0AA:     18100.0  JR1FYS       FT8 -12 dB                     2156Z",
    "DX de W3LPL:     14025.0  ZS6ABC       CW 25 wpm                      2157Z",
    "DX de DL1ABC:     7074.0  VK2DEF       FT8                            2158Z JO62",
    "DX de G4XYZ:     28074.0  PY2AA        up 2                           2159Z",
];

fn prefix_table() -> PrefixTable {
    let rows = [
        ("K", 38.0, -97.0),
        ("W", 37.5, -91.7),
        ("W3", 40.0, -76.0),
        ("JR", 35.7, 139.7),
        ("ZS", -29.0, 24.0),
        ("DL", 51.0, 10.0),
        ("VK", -25.0, 133.0),
        ("G", 52.5, -1.5),
        ("PY", -10.0, -53.0),
    ];
    PrefixTable::from_rows(rows.into_iter().map(|(prefix, lat, lng)| PrefixRow {
        prefix: prefix.to_string(),
        location: LatLng::from_degrees(lat, lng),
    }))
}

fn bench_cluster_lines(c: &mut Criterion) {
    let mut group = c.benchmark_group("cluster_line");
    let table = prefix_table();
    let now = Utc.with_ymd_and_hms(2026, 10, 15, 22, 0, 0).unwrap();

    group.throughput(Throughput::Elements(1));
    group.bench_function("parse_single", |b| {
        b.iter(|| parse_spot_line(black_box(SAMPLE_SPOTS[0])))
    });

    group.throughput(Throughput::Elements(SAMPLE_SPOTS.len() as u64));
    group.bench_function("decode_batch", |b| {
        b.iter(|| {
            for line in SAMPLE_SPOTS {
                let _ = decode_cluster_line(black_box(line), now, &table);
            }
        })
    });

    let banner = "Hello KD0AA, this is W3LPL-2 in Frederick MD running AR-Cluster";
    group.throughput(Throughput::Elements(1));
    group.bench_function("reject_non_spot", |b| {
        b.iter(|| looks_like_spot(black_box(banner)))
    });

    group.finish();
}

fn bench_datagrams(c: &mut Criterion) {
    let mut group = c.benchmark_group("datagram");
    let now = Utc.with_ymd_and_hms(2026, 10, 15, 22, 0, 0).unwrap();
    let status = StatusBuilder::new("K1ABC", "FN42", "JA1XYZ", "PM95", 14_074_000).build();

    group.throughput(Throughput::Bytes(status.len() as u64));
    group.bench_function("decode_status", |b| {
        b.iter(|| decode_datagram(black_box(&status), now))
    });

    group.finish();
}

fn bench_spot_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("spot_list");
    let start = Utc.with_ymd_and_hms(2026, 10, 15, 0, 0, 0).unwrap();
    let spots: Vec<SpotRecord> = (0..1000)
        .map(|i| {
            SpotRecord::new(
                "KD0AA",
                &format!("W{}AB", i),
                LatLng::from_degrees(38.0, -97.0),
                LatLng::from_degrees(35.7, 139.7),
                7000.0 + i as f64,
                start + TimeDelta::seconds(i),
            )
        })
        .collect();

    group.throughput(Throughput::Elements(spots.len() as u64));
    group.bench_function("insert_1000_into_100", |b| {
        b.iter(|| {
            let mut list = SpotList::new(100, 10);
            for spot in &spots {
                list.insert(spot.clone());
            }
            list
        })
    });

    let mut full = SpotList::new(1000, 10);
    for spot in &spots {
        full.insert(spot.clone());
    }
    group.throughput(Throughput::Elements(1));
    group.bench_function("nearest_in_1000", |b| {
        b.iter(|| full.nearest(black_box(LatLng::from_degrees(40.0, -100.0)), 0.5))
    });

    group.finish();
}

criterion_group!(benches, bench_cluster_lines, bench_datagrams, bench_spot_list);
criterion_main!(benches);
