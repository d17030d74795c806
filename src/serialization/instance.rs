use log::info;
use sqlite::OpenFlags;

use crate::demand::DemandScenarios;
use crate::instance::{
    config_from_key_values, CityRow, Instance, TravelTimeRow,
};
use crate::primitives::FVal;
use crate::serialization::ImportError;

/// Writes the assembled instance (cities, travel times, carrier config, and
/// the sampled demand scenarios) to a sqlite database. This is the exchange
/// file between the `build` stage and the model-consuming stages.
pub fn export_instance(
    instance: &Instance,
    scenarios: &DemandScenarios,
    out_filename: &str,
) -> Result<(), sqlite::Error> {
    let connection = sqlite::Connection::open_with_flags(
        out_filename,
        OpenFlags::default()
            .with_create()
            .with_no_mutex()
            .with_read_write(),
    )?;
    connection.execute("BEGIN TRANSACTION;")?;

    connection.execute(
        "CREATE TABLE city (
            id INTEGER PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            population INTEGER NOT NULL,
            station_capacity INTEGER NOT NULL
        );",
    )?;
    connection.execute(
        "CREATE TABLE travel_time (
            origin INTEGER NOT NULL,
            destination INTEGER NOT NULL,
            seconds INTEGER NOT NULL
        );",
    )?;
    connection.execute(
        "CREATE TABLE config (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL
        );",
    )?;
    connection.execute(
        "CREATE TABLE demand_avg (
            origin INTEGER NOT NULL,
            destination INTEGER NOT NULL,
            avg REAL NOT NULL
        );",
    )?;
    connection.execute(
        "CREATE TABLE demand_sample (
            origin INTEGER NOT NULL,
            destination INTEGER NOT NULL,
            sample_index INTEGER NOT NULL,
            value REAL NOT NULL
        );",
    )?;

    let mut stmt = connection
        .prepare("INSERT INTO city (id, name, population, station_capacity) VALUES (?, ?, ?, ?)")?;
    for (idx, city) in instance.cities() {
        stmt.bind((1, idx.0 as i64))?;
        stmt.bind((2, city.name.as_str()))?;
        stmt.bind((3, city.population as i64))?;
        stmt.bind((4, city.station_capacity as i64))?;
        stmt.next()?;
        stmt.reset()?;
    }

    let mut stmt = connection
        .prepare("INSERT INTO travel_time (origin, destination, seconds) VALUES (?, ?, ?)")?;
    for (origin, _) in instance.cities() {
        for (destination, _) in instance.cities() {
            let Some(seconds) = instance.travel_time(origin, destination) else {
                continue;
            };
            stmt.bind((1, origin.0 as i64))?;
            stmt.bind((2, destination.0 as i64))?;
            stmt.bind((3, seconds as i64))?;
            stmt.next()?;
            stmt.reset()?;
        }
    }

    let mut stmt = connection.prepare("INSERT INTO config (key, value) VALUES (?, ?)")?;
    for (key, value) in instance.config.to_key_values() {
        stmt.bind((1, key.as_str()))?;
        stmt.bind((2, value.as_str()))?;
        stmt.next()?;
        stmt.reset()?;
    }

    let mut stmt = connection
        .prepare("INSERT INTO demand_avg (origin, destination, avg) VALUES (?, ?, ?)")?;
    for (origin, destination, avg) in scenarios.averages() {
        stmt.bind((1, origin.0 as i64))?;
        stmt.bind((2, destination.0 as i64))?;
        stmt.bind((3, avg))?;
        stmt.next()?;
        stmt.reset()?;
    }

    let mut stmt = connection.prepare(
        "INSERT INTO demand_sample (origin, destination, sample_index, value) VALUES (?, ?, ?, ?)",
    )?;
    for (origin, _) in instance.cities() {
        for (destination, _) in instance.cities() {
            for (sample_index, &value) in
                scenarios.samples(origin, destination).iter().enumerate()
            {
                stmt.bind((1, origin.0 as i64))?;
                stmt.bind((2, destination.0 as i64))?;
                stmt.bind((3, sample_index as i64))?;
                stmt.bind((4, value))?;
                stmt.next()?;
                stmt.reset()?;
            }
        }
    }

    connection.execute("END TRANSACTION;")?;
    info!("Exported instance to {}", out_filename);
    Ok(())
}

/// Reads an instance database back. The raw rows go through the same
/// validation as the CSV path, so a tampered database fails the same way a
/// bad input file does.
pub fn import_instance(filename: &str) -> Result<(Instance, DemandScenarios), ImportError> {
    let connection =
        sqlite::Connection::open_with_flags(filename, OpenFlags::default().with_read_only())
            .map_err(ImportError::Sqlite)?;

    let mut config_map = std::collections::HashMap::new();
    for row in connection
        .prepare("SELECT key, value FROM config;")
        .map_err(ImportError::Sqlite)?
        .iter()
    {
        let row = row.map_err(ImportError::Sqlite)?;
        config_map.insert(
            row.read::<&str, _>(0).to_string(),
            row.read::<&str, _>(1).to_string(),
        );
    }
    let config = config_from_key_values(config_map).map_err(ImportError::Config)?;

    let mut city_rows: Vec<CityRow> = Vec::new();
    for row in connection
        .prepare("SELECT id, name, population, station_capacity FROM city ORDER BY id;")
        .map_err(ImportError::Sqlite)?
        .iter()
    {
        let row = row.map_err(ImportError::Sqlite)?;
        let id: i64 = row.read(0);
        if id != city_rows.len() as i64 {
            return Err(ImportError::NonContiguousCityIds { id });
        }
        city_rows.push(CityRow {
            name: row.read::<&str, _>(1).to_string(),
            population: row.read::<i64, _>(2) as u64,
            station_capacity: row.read::<i64, _>(3) as u32,
        });
    }

    let n = city_rows.len() as i64;
    let mut travel_rows: Vec<TravelTimeRow> = Vec::new();
    for row in connection
        .prepare("SELECT origin, destination, seconds FROM travel_time;")
        .map_err(ImportError::Sqlite)?
        .iter()
    {
        let row = row.map_err(ImportError::Sqlite)?;
        let origin: i64 = row.read(0);
        let destination: i64 = row.read(1);
        if !(0..n).contains(&origin) {
            return Err(ImportError::CityIdOutOfRange { id: origin });
        }
        if !(0..n).contains(&destination) {
            return Err(ImportError::CityIdOutOfRange { id: destination });
        }
        // The table holds both directions; assembly mirrors them again.
        if origin < destination {
            travel_rows.push(TravelTimeRow {
                origin: city_rows[origin as usize].name.clone(),
                destination: city_rows[destination as usize].name.clone(),
                seconds: row.read::<i64, _>(2) as u32,
            });
        }
    }

    let instance =
        Instance::assemble(&city_rows, &travel_rows, config).map_err(ImportError::Config)?;

    let mut averages = vec![0.0_f64; (n * n) as usize];
    for row in connection
        .prepare("SELECT origin, destination, avg FROM demand_avg;")
        .map_err(ImportError::Sqlite)?
        .iter()
    {
        let row = row.map_err(ImportError::Sqlite)?;
        let origin: i64 = row.read(0);
        let destination: i64 = row.read(1);
        if !(0..n).contains(&origin) {
            return Err(ImportError::CityIdOutOfRange { id: origin });
        }
        if !(0..n).contains(&destination) {
            return Err(ImportError::CityIdOutOfRange { id: destination });
        }
        let avg: FVal = row.read(2);
        averages[(origin * n + destination) as usize] = avg;
    }
    let scenarios = DemandScenarios::from_averages(n as usize, averages);

    Ok((instance, scenarios))
}
