//! CPLEX LP format export and solution-file import: the on-disk exchange
//! with an external mixed-integer solver.

use std::fmt::Write;

use crate::col::set_new;
use crate::model::{ConstrSense, LinExpr, MilpModel, VarIdx};
use crate::primitives::FVal;

const TERMS_PER_LINE: usize = 6;

fn push_expr(out: &mut String, model: &MilpModel, expr: &LinExpr) {
    let terms = expr.canonical_terms();
    if terms.is_empty() {
        // LP parsers need at least one term; anchor the row on the first
        // variable with a zero coefficient.
        write!(out, "0 {}", model.var(VarIdx(0)).name).unwrap();
        return;
    }
    for (i, &(var, coeff)) in terms.iter().enumerate() {
        if i == 0 {
            if coeff < 0.0 {
                out.push_str("- ");
            }
        } else if coeff < 0.0 {
            out.push_str(" - ");
        } else {
            out.push_str(" + ");
        }
        let magnitude = coeff.abs();
        if magnitude == 1.0 {
            out.push_str(&model.var(var).name);
        } else {
            write!(out, "{} {}", magnitude, model.var(var).name).unwrap();
        }
        if (i + 1) % TERMS_PER_LINE == 0 && i + 1 < terms.len() {
            out.push_str("\n   ");
        }
    }
}

fn sense_token(sense: ConstrSense) -> &'static str {
    match sense {
        ConstrSense::LEQ => "<=",
        ConstrSense::EQ => "=",
        ConstrSense::GEQ => ">=",
    }
}

/// Renders the model in CPLEX LP format.
pub fn render(model: &MilpModel) -> String {
    let mut out = String::new();
    out.push_str("\\ busflow flow model\n");
    out.push_str("Minimize\n obj: ");
    push_expr(&mut out, model, model.objective());
    out.push_str("\nSubject To\n");
    for constraint in model.constraints() {
        write!(out, " {}: ", constraint.label).unwrap();
        push_expr(&mut out, model, &constraint.expr);
        writeln!(out, " {} {}", sense_token(constraint.sense), constraint.rhs).unwrap();
    }
    out.push_str("Bounds\n");
    for (_, var) in model.vars() {
        if var.upper.is_finite() {
            writeln!(out, " {} <= {} <= {}", var.lower, var.name, var.upper).unwrap();
        } else {
            writeln!(out, " {} >= {}", var.name, var.lower).unwrap();
        }
    }
    let integers: Vec<&str> = model
        .vars()
        .filter(|(_, var)| var.integer)
        .map(|(_, var)| var.name.as_str())
        .collect();
    if !integers.is_empty() {
        out.push_str("General\n");
        for chunk in integers.chunks(TERMS_PER_LINE) {
            writeln!(out, " {}", chunk.join(" ")).unwrap();
        }
    }
    out.push_str("End\n");
    out
}

#[derive(Debug)]
pub enum ReadSolutionError {
    Csv(csv::Error),
    UnknownVariable { name: String },
    DuplicateVariable { name: String },
}

/// Reads an external solver's variable values (`# variable; value` rows).
/// Variables absent from the file default to zero, the common convention of
/// solution writers; an unknown name is a hard error, not a skip.
pub fn parse_solution(
    model: &MilpModel,
    stream: impl std::io::Read,
) -> Result<Vec<FVal>, ReadSolutionError> {
    let mut builder = csv::ReaderBuilder::new();
    builder.trim(csv::Trim::All).delimiter(b';');
    let rows = builder
        .from_reader(stream)
        .deserialize()
        .collect::<Result<Box<[(String, FVal)]>, csv::Error>>()
        .map_err(ReadSolutionError::Csv)?;

    let mut values = vec![0.0; model.num_vars()];
    let mut seen = set_new();
    for (name, value) in rows.iter() {
        let var = model
            .var_named(name)
            .ok_or_else(|| ReadSolutionError::UnknownVariable { name: name.clone() })?;
        if !seen.insert(var) {
            return Err(ReadSolutionError::DuplicateVariable { name: name.clone() });
        }
        values[var.0 as usize] = *value;
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demand::DemandScenarios;
    use crate::discretize::Discretization;
    use crate::model::build_model;
    use crate::network::TimeExpandedNetwork;
    use crate::test::sample::create_two_city_instance;

    fn model() -> MilpModel {
        let instance = create_two_city_instance();
        let disc = Discretization::new(instance.config.tao).unwrap();
        let network = TimeExpandedNetwork::build(&instance, &disc);
        let scenarios = DemandScenarios::from_averages(2, vec![0.0, 10.0, 10.0, 0.0]);
        build_model(&instance, &network, &scenarios)
    }

    #[test]
    fn test_render_sections_and_labels() {
        let model = model();
        let lp = render(&model);
        assert!(lp.starts_with("\\ busflow flow model\nMinimize\n obj: "));
        assert!(lp.contains("Subject To"));
        assert!(lp.contains(" station_cap_A_0: X_A_A_0 <= 5"));
        assert!(lp.contains(" fleet_cycle_cap: X_A_A_96 + X_B_B_96 <= 2"));
        assert!(lp.contains(" seat_sync_A_B_0: Y_A_B_0 - 20 X_A_B_0 <= 0"));
        assert!(lp.contains(" daily_demand_A_B: "));
        assert!(lp.contains("Bounds\n"));
        assert!(lp.contains(" 0 <= X_A_B_0 <= 1\n"));
        assert!(lp.contains(" Y_A_B_0 >= 0\n"));
        assert!(lp.contains("General\n"));
        assert!(lp.ends_with("End\n"));
    }

    #[test]
    fn test_parse_solution_defaults_to_zero() {
        let model = model();
        let content = r#"# variable; value
X_A_B_0; 1
Y_A_B_0; 18.0"#;
        let values = parse_solution(&model, content.as_bytes()).unwrap();
        let bus = model.var_named("X_A_B_0").unwrap();
        let pax = model.var_named("Y_A_B_0").unwrap();
        let other = model.var_named("X_B_A_4").unwrap();
        assert_eq!(values[bus.0 as usize], 1.0);
        assert_eq!(values[pax.0 as usize], 18.0);
        assert_eq!(values[other.0 as usize], 0.0);
    }

    #[test]
    fn test_parse_solution_rejects_unknown_variable() {
        let model = model();
        let content = r#"# variable; value
X_A_Z_0; 1"#;
        assert!(matches!(
            parse_solution(&model, content.as_bytes()),
            Err(ReadSolutionError::UnknownVariable { .. })
        ));
    }

    #[test]
    fn test_parse_solution_rejects_duplicate_variable() {
        let model = model();
        let content = r#"# variable; value
X_A_B_0; 1
X_A_B_0; 0"#;
        assert!(matches!(
            parse_solution(&model, content.as_bytes()),
            Err(ReadSolutionError::DuplicateVariable { .. })
        ));
    }
}
