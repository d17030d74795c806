use log::info;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use sqlite::OpenFlags;

use crate::flow::ScheduleFlow;
use crate::milp::{Solution, SolveStatus};
use crate::network::{ArcKind, TimeExpandedNetwork};
use crate::primitives::FVal;
use crate::serialization::ImportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum DbArcKind {
    Service = 0,
    Holding = 1,
    Cycling = 2,
}

/// One persisted nonzero flow, addressed by arc coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowRecord {
    pub kind: DbArcKind,
    pub origin: u32,
    pub destination: u32,
    pub depart_bin: u32,
    pub bus: FVal,
    pub passengers: FVal,
}

/// Writes the validated schedule (solve status, objective, nonzero flows)
/// to a sqlite database.
pub fn export_flow(
    flow: &ScheduleFlow,
    solution: &Solution,
    network: &TimeExpandedNetwork,
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
        "CREATE TABLE solve (
            status TEXT NOT NULL,
            objective REAL NOT NULL
        );",
    )?;
    connection.execute(
        "CREATE TABLE flow (
            arc_kind INTEGER NOT NULL,
            origin INTEGER NOT NULL,
            destination INTEGER NOT NULL,
            depart_bin INTEGER NOT NULL,
            bus REAL NOT NULL,
            passengers REAL NOT NULL
        );",
    )?;

    let mut stmt = connection.prepare("INSERT INTO solve (status, objective) VALUES (?, ?)")?;
    stmt.bind((1, solution.status.as_str()))?;
    stmt.bind((2, solution.objective))?;
    stmt.next()?;

    let mut stmt = connection.prepare(
        "INSERT INTO flow (arc_kind, origin, destination, depart_bin, bus, passengers) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )?;
    for arc_flow in flow.iter() {
        let (kind, origin, destination, depart_bin) = match arc_flow.kind {
            ArcKind::Service {
                origin,
                destination,
                depart,
                ..
            } => (DbArcKind::Service, origin.0, destination.0, depart),
            ArcKind::Holding { city, bin } => (DbArcKind::Holding, city.0, city.0, bin),
            ArcKind::Cycling { city } => (DbArcKind::Cycling, city.0, city.0, network.taos()),
        };
        stmt.bind((1, kind as i64))?;
        stmt.bind((2, origin as i64))?;
        stmt.bind((3, destination as i64))?;
        stmt.bind((4, depart_bin as i64))?;
        stmt.bind((5, arc_flow.bus))?;
        stmt.bind((6, arc_flow.passengers))?;
        stmt.next()?;
        stmt.reset()?;
    }

    connection.execute("END TRANSACTION;")?;
    info!("Exported {} nonzero flows to {}", flow.len(), out_filename);
    Ok(())
}

/// Reads a flow database back, for downstream tooling and round-trip tests.
pub fn import_flow(
    filename: &str,
) -> Result<(SolveStatus, FVal, Vec<FlowRecord>), ImportError> {
    let connection =
        sqlite::Connection::open_with_flags(filename, OpenFlags::default().with_read_only())
            .map_err(ImportError::Sqlite)?;

    let mut status = None;
    let mut objective = 0.0;
    for row in connection
        .prepare("SELECT status, objective FROM solve;")
        .map_err(ImportError::Sqlite)?
        .iter()
    {
        let row = row.map_err(ImportError::Sqlite)?;
        let raw = row.read::<&str, _>(0).to_string();
        status = Some(
            SolveStatus::parse(&raw).ok_or(ImportError::UnknownStatus { status: raw })?,
        );
        objective = row.read(1);
    }
    let status = status.ok_or(ImportError::UnknownStatus {
        status: "<missing>".into(),
    })?;

    let mut records = Vec::new();
    for row in connection
        .prepare(
            "SELECT arc_kind, origin, destination, depart_bin, bus, passengers FROM flow \
             ORDER BY origin, arc_kind, depart_bin;",
        )
        .map_err(ImportError::Sqlite)?
        .iter()
    {
        let row = row.map_err(ImportError::Sqlite)?;
        let raw_kind: i64 = row.read(0);
        let kind = DbArcKind::from_i64(raw_kind)
            .ok_or(ImportError::UnknownArcKind { kind: raw_kind })?;
        records.push(FlowRecord {
            kind,
            origin: row.read::<i64, _>(1) as u32,
            destination: row.read::<i64, _>(2) as u32,
            depart_bin: row.read::<i64, _>(3) as u32,
            bus: row.read(4),
            passengers: row.read(5),
        });
    }

    Ok((status, objective, records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demand::DemandScenarios;
    use crate::discretize::Discretization;
    use crate::model::build_model;
    use crate::network::TimeExpandedNetwork;
    use crate::test::sample::create_two_city_instance;

    #[test]
    fn test_flow_export_import() {
        let path = std::env::temp_dir().join("busflow-test-flow.sqlite3");
        let filename = path.to_str().unwrap();
        if path.exists() {
            std::fs::remove_file(&path).unwrap();
        }

        let instance = create_two_city_instance();
        let disc = Discretization::new(instance.config.tao).unwrap();
        let network = TimeExpandedNetwork::build(&instance, &disc);
        let scenarios = DemandScenarios::from_averages(2, vec![0.0, 10.0, 10.0, 0.0]);
        let model = build_model(&instance, &network, &scenarios);

        let a = instance.city_by_name("A").unwrap();
        let b = instance.city_by_name("B").unwrap();
        let mut values = vec![0.0; model.num_vars()];
        values[model.bus_var(network.cycling_arc(a)).unwrap().0 as usize] = 1.0;
        values[model.bus_var(network.cycling_arc(b)).unwrap().0 as usize] = 1.0;
        let solution = Solution {
            status: SolveStatus::OPTIMAL,
            objective: 0.0,
            values: values.clone(),
        };
        let flow = ScheduleFlow::extract(&model, &network, &values);
        export_flow(&flow, &solution, &network, filename).unwrap();

        let (status, objective, records) = import_flow(filename).unwrap();
        assert_eq!(status, SolveStatus::OPTIMAL);
        assert_eq!(objective, 0.0);
        assert_eq!(
            records,
            vec![
                FlowRecord {
                    kind: DbArcKind::Cycling,
                    origin: a.0,
                    destination: a.0,
                    depart_bin: 96,
                    bus: 1.0,
                    passengers: 0.0,
                },
                FlowRecord {
                    kind: DbArcKind::Cycling,
                    origin: b.0,
                    destination: b.0,
                    depart_bin: 96,
                    bus: 1.0,
                    passengers: 0.0,
                },
            ]
        );

        std::fs::remove_file(&path).unwrap();
    }
}
