//! Aggregate hiring reports over previously loaded tables.

use serde::Serialize;
use thiserror::Error;

use crate::db::Pool;

/// Hiring years outside this range are almost certainly bad input.
const MIN_REPORT_YEAR: i32 = 1900;
const MAX_REPORT_YEAR: i32 = 2100;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Year {0} is outside the supported range {MIN_REPORT_YEAR}-{MAX_REPORT_YEAR}")]
    InvalidYear(i32),
    #[error("Report query failed: {0}")]
    Query(#[from] sqlx::Error),
}

/// Hires per quarter for one department and job combination.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QuarterRow {
    pub department: String,
    pub job: String,
    #[serde(rename = "Q1")]
    pub q1: i64,
    #[serde(rename = "Q2")]
    pub q2: i64,
    #[serde(rename = "Q3")]
    pub q3: i64,
    #[serde(rename = "Q4")]
    pub q4: i64,
}

/// Total hires for one department in the report year.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DepartmentHires {
    pub id: i64,
    pub department: String,
    pub hired: i64,
}

const QUARTER_SQL_PG: &str = "\
SELECT d.department, j.job, \
       SUM(CASE WHEN EXTRACT(QUARTER FROM he.datetime) = 1 THEN 1 ELSE 0 END) AS q1, \
       SUM(CASE WHEN EXTRACT(QUARTER FROM he.datetime) = 2 THEN 1 ELSE 0 END) AS q2, \
       SUM(CASE WHEN EXTRACT(QUARTER FROM he.datetime) = 3 THEN 1 ELSE 0 END) AS q3, \
       SUM(CASE WHEN EXTRACT(QUARTER FROM he.datetime) = 4 THEN 1 ELSE 0 END) AS q4 \
FROM hired_employees he \
JOIN departments d ON he.department_id = d.id \
JOIN jobs j ON he.job_id = j.id \
WHERE EXTRACT(YEAR FROM he.datetime) = $1 \
GROUP BY d.department, j.job \
ORDER BY d.department ASC, j.job ASC";

const QUARTER_SQL_SQLITE: &str = "\
SELECT d.department, j.job, \
       SUM(CASE WHEN CAST(strftime('%m', he.datetime) AS INTEGER) BETWEEN 1 AND 3 THEN 1 ELSE 0 END) AS q1, \
       SUM(CASE WHEN CAST(strftime('%m', he.datetime) AS INTEGER) BETWEEN 4 AND 6 THEN 1 ELSE 0 END) AS q2, \
       SUM(CASE WHEN CAST(strftime('%m', he.datetime) AS INTEGER) BETWEEN 7 AND 9 THEN 1 ELSE 0 END) AS q3, \
       SUM(CASE WHEN CAST(strftime('%m', he.datetime) AS INTEGER) BETWEEN 10 AND 12 THEN 1 ELSE 0 END) AS q4 \
FROM hired_employees he \
JOIN departments d ON he.department_id = d.id \
JOIN jobs j ON he.job_id = j.id \
WHERE CAST(strftime('%Y', he.datetime) AS INTEGER) = $1 \
GROUP BY d.department, j.job \
ORDER BY d.department ASC, j.job ASC";

// The year parameter must appear exactly once so the statement works with
// a single bind on both backends; the CTE lets the average subquery reuse
// the filtered rows.
const ABOVE_AVERAGE_SQL_PG: &str = "\
WITH filtered AS ( \
    SELECT department_id FROM hired_employees \
    WHERE EXTRACT(YEAR FROM datetime) = $1 \
) \
SELECT d.id::BIGINT, d.department, COUNT(*) AS hired \
FROM filtered f \
JOIN departments d ON f.department_id = d.id \
GROUP BY d.id, d.department \
HAVING COUNT(*) > ( \
    SELECT AVG(hired) FROM ( \
        SELECT COUNT(*) AS hired FROM filtered GROUP BY department_id \
    ) per_department \
) \
ORDER BY hired DESC, d.department ASC";

const ABOVE_AVERAGE_SQL_SQLITE: &str = "\
WITH filtered AS ( \
    SELECT department_id FROM hired_employees \
    WHERE CAST(strftime('%Y', datetime) AS INTEGER) = $1 \
) \
SELECT d.id, d.department, COUNT(*) AS hired \
FROM filtered f \
JOIN departments d ON f.department_id = d.id \
GROUP BY d.id, d.department \
HAVING COUNT(*) > ( \
    SELECT AVG(hired) FROM ( \
        SELECT COUNT(*) AS hired FROM filtered GROUP BY department_id \
    ) per_department \
) \
ORDER BY hired DESC, d.department ASC";

fn validate_year(year: i32) -> Result<(), ReportError> {
    if (MIN_REPORT_YEAR..=MAX_REPORT_YEAR).contains(&year) {
        Ok(())
    } else {
        Err(ReportError::InvalidYear(year))
    }
}

/// Employees hired in the given year, split by quarter for each department
/// and job. Rows are ordered alphabetically by department, then job.
pub async fn hires_by_quarter(pool: &Pool, year: i32) -> Result<Vec<QuarterRow>, ReportError> {
    validate_year(year)?;
    let sql = if pool.is_postgres() {
        QUARTER_SQL_PG
    } else {
        QUARTER_SQL_SQLITE
    };
    let rows = pool.fetch_quarter_rows(sql, year).await?;
    Ok(rows
        .into_iter()
        .map(|(department, job, q1, q2, q3, q4)| QuarterRow {
            department,
            job,
            q1,
            q2,
            q3,
            q4,
        })
        .collect())
}

/// Departments that hired more employees in the given year than the mean
/// across all departments with at least one hire. Ordered by hire count
/// descending, department name breaking ties.
pub async fn departments_above_average(
    pool: &Pool,
    year: i32,
) -> Result<Vec<DepartmentHires>, ReportError> {
    validate_year(year)?;
    let sql = if pool.is_postgres() {
        ABOVE_AVERAGE_SQL_PG
    } else {
        ABOVE_AVERAGE_SQL_SQLITE
    };
    let rows = pool.fetch_department_rows(sql, year).await?;
    Ok(rows
        .into_iter()
        .map(|(id, department, hired)| DepartmentHires {
            id,
            department,
            hired,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_year_bounds() {
        assert!(validate_year(1900).is_ok());
        assert!(validate_year(2021).is_ok());
        assert!(validate_year(2100).is_ok());
        assert!(matches!(
            validate_year(1899),
            Err(ReportError::InvalidYear(1899))
        ));
        assert!(matches!(
            validate_year(2101),
            Err(ReportError::InvalidYear(2101))
        ));
    }

    #[tokio::test]
    async fn test_invalid_year_rejected_before_any_query() {
        // A pool with no tables never sees the query when the year is bad.
        let pool = Pool::sqlite_in_memory().await.unwrap();
        let err = hires_by_quarter(&pool, 1812).await.unwrap_err();
        assert!(matches!(err, ReportError::InvalidYear(1812)));
    }
}
