use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use plant_series::{
    combine_by_precedence, left_join_onto_grid, resample, CanonicalGrid, ChannelCatalogue, Channel,
    ObservationTable,
};

/// One month of 1-minute readings for every Domeyko inverter.
fn month_of_inverters() -> (CanonicalGrid, ObservationTable) {
    let start = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();
    let end = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    let grid = CanonicalGrid::build(start, end, 1, 0).unwrap();

    let catalogue = ChannelCatalogue::domeyko_inverters();
    let channels = catalogue
        .display_names()
        .into_iter()
        .enumerate()
        .map(|(k, name)| {
            let values = (0..grid.len())
                .map(|i| if (i + k) % 97 == 0 { None } else { Some(((i % 1440) as f64).sin().abs() * 900.0) })
                .collect();
            Channel::new(name, values)
        })
        .collect();
    let table = ObservationTable::new(grid.timestamps().to_vec(), channels).unwrap();
    (grid, table)
}

fn benchmark_month_resample(c: &mut Criterion) {
    let (_, table) = month_of_inverters();
    let directive = ChannelCatalogue::domeyko_inverters().fine_directive();

    c.bench_function("resample_month_1m_to_15m", |b| {
        b.iter(|| black_box(resample(&table, 15, &directive).unwrap()));
    });
}

fn benchmark_grid_join(c: &mut Criterion) {
    let (grid, table) = month_of_inverters();

    c.bench_function("left_join_month_onto_grid", |b| {
        b.iter(|| black_box(left_join_onto_grid(&grid, std::slice::from_ref(&table)).unwrap()));
    });
}

fn benchmark_precedence_combine(c: &mut Criterion) {
    let (_, table) = month_of_inverters();
    let tables = vec![table.clone(), table];

    c.bench_function("combine_two_months", |b| {
        b.iter(|| black_box(combine_by_precedence(&tables).unwrap()));
    });
}

criterion_group!(
    benches,
    benchmark_month_resample,
    benchmark_grid_join,
    benchmark_precedence_combine
);
criterion_main!(benches);
