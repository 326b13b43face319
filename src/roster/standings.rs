use itertools::Itertools;

use super::{CompetitorId, Quota, RosterSnapshot};

/// One row of the standings table.
#[derive(Clone, Debug, PartialEq)]
pub struct Standing {
    pub id: CompetitorId,
    pub name: String,
    pub team: String,
    pub sales: f64,
    /// `min(sales / quota * 100, 100)`.
    pub percent: f64,
}

impl Standing {
    pub fn percent_label(&self) -> String {
        format!("{:.2}%", self.percent)
    }
}

/// Standings in roster order. Unnamed competitors show up with empty name and team.
pub fn standings(snapshot: &RosterSnapshot, quota: Quota) -> Vec<Standing> {
    snapshot
        .iter()
        .map(|competitor| Standing {
            id: competitor.id,
            name: competitor.display_name.clone().unwrap_or_default(),
            team: competitor.group.clone().unwrap_or_default(),
            sales: competitor.cumulative_progress,
            percent: quota.percent(competitor.cumulative_progress),
        })
        .collect()
}

/// Plain text rendering of the standings, one competitor per line.
pub fn format_table(rows: &[Standing]) -> String {
    let header = format!(
        "{:>6}  {:<20}  {:<12}  {:>12}  {:>8}",
        "Id", "Name", "Team", "Sales", "Progress"
    );
    std::iter::once(header)
        .chain(rows.iter().map(|row| {
            format!(
                "{:>6}  {:<20}  {:<12}  {:>12.2}  {:>8}",
                row.id,
                row.name,
                row.team,
                row.sales,
                row.percent_label()
            )
        }))
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::{Competitor, ProgressEvent, RosterStore};

    #[test]
    fn test_standings_percentages() {
        let mut store = RosterStore::new();
        store
            .bootstrap(vec![
                Competitor::new(1, "Ada", "North", 10000.),
                Competitor::new(2, "Bob", "South", 45000.),
            ])
            .unwrap();
        store.merge(&ProgressEvent {
            competitor_id: 7,
            new_cumulative_progress: 1.,
        });

        let rows = standings(&store.snapshot(), Quota::default());

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].percent_label(), "33.33%");
        assert_eq!(rows[1].percent, 100.);
        assert_eq!(rows[2].name, "");
        assert_eq!(rows[2].percent_label(), "0.00%");
    }

    #[test]
    fn test_format_table() {
        let rows = vec![Standing {
            id: 1,
            name: "Ada".to_string(),
            team: "North".to_string(),
            sales: 15000.,
            percent: 50.,
        }];

        let table = format_table(&rows);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Progress"));
        assert!(lines[1].contains("Ada"));
        assert!(lines[1].contains("15000.00"));
        assert!(lines[1].ends_with("50.00%"));
    }
}
