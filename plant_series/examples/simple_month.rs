use chrono::{Duration, NaiveDate};
use plant_series::{
    catalogue::ChannelSpec, daily_missing_ratio, left_join_onto_grid, mask_outside_window, power_to_energy,
    resample, AggRule, CanonicalGrid, ChannelCatalogue, Normalizer, RawCell, RawTable, Resolution,
};

fn main() -> plant_series::Result<()> {
    // Two inverters reporting every minute of one day, as an SDI export would
    let catalogue = ChannelCatalogue::new(vec![
        ChannelSpec::new("PN1_S11_AN10028", "Cabin 1 inverter 1 [kW]", AggRule::Mean, AggRule::Sum)
            .with_energy("Cabin 1 inverter 1 [kWh]"),
        ChannelSpec::new("PN1_S11_AN20028", "Cabin 1 inverter 2 [kW]", AggRule::Mean, AggRule::Sum)
            .with_energy("Cabin 1 inverter 2 [kWh]"),
    ]);

    let day = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();
    let headers = ["gg", "mm", "aaaa", "hh", "mm", "ss", "PN1_S11_AN10028", "PN1_S11_AN20028"]
        .iter()
        .map(|h| h.to_string())
        .collect();
    let rows = (0..1440)
        .map(|minute| {
            let ts = day.and_hms_opt(0, 0, 0).unwrap() + Duration::minutes(minute);
            let hour = minute / 60;
            // Sunlight between 07:00 and 19:00, the second inverter drops out at noon
            let power = if (7..19).contains(&hour) { 500.0 } else { 1.0 };
            let second = if hour == 12 { RawCell::text("nan") } else { RawCell::Number(power * 0.9) };
            vec![
                RawCell::Number(1.0),
                RawCell::Number(12.0),
                RawCell::Number(2024.0),
                RawCell::text(ts.format("%H").to_string()),
                RawCell::text(ts.format("%M").to_string()),
                RawCell::text("0"),
                RawCell::Number(power),
                second,
            ]
        })
        .collect();
    let raw = RawTable::new(headers, rows);

    let table = Normalizer::scada_sdi()
        .with_renames(catalogue.rename_map())
        .normalize(&raw)?;

    let grid = CanonicalGrid::build(day, day + Duration::days(1), Resolution::OneMinute.minutes(), 0)?;
    let joined = left_join_onto_grid(&grid, &[table])?;
    let masked = mask_outside_window(
        &joined,
        chrono::NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
        chrono::NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
    );

    let quarter = resample(&masked, 15, &catalogue.fine_directive())?.table;
    let energy = power_to_energy(&quarter, &catalogue.energy_pairs(), Resolution::FifteenMinutes.hours())?;
    let daily = resample(&energy, 1440, &catalogue.coarse_directive())?.table;

    println!("Daily production");
    println!("================");
    for channel in daily.channels() {
        println!("{}: {:.1}", channel.name, channel.values[0].unwrap_or_default());
    }

    println!();
    println!("Daily missing ratio");
    for channel in daily_missing_ratio(&joined).channels() {
        println!("{}: {:.3}", channel.name, channel.values[0].unwrap_or_default());
    }
    Ok(())
}
