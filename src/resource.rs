/// The fully-qualified identifier of a Cloud Spanner database.
///
/// Spanner RPCs address resources by path, e.g. the database `my-database`
/// in the `my-instance` instance of the `my-gcp-project` project is
/// `projects/my-gcp-project/instances/my-instance/databases/my-database`.
/// A connection is scoped to exactly one database, so the three naming
/// components travel together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseId {
    project: String,
    instance: String,
    database: String,
}

impl DatabaseId {
    pub fn new(
        project: impl Into<String>,
        instance: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            instance: instance.into(),
            database: database.into(),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Path to all instances of the project, e.g. `projects/p/instances`.
    pub fn instances_path(&self) -> String {
        format!("projects/{}/instances", self.project)
    }

    /// Path of the instance, e.g. `projects/p/instances/i`.
    pub fn instance_path(&self) -> String {
        format!("{}/{}", self.instances_path(), self.instance)
    }

    /// Path to all databases of the instance, e.g.
    /// `projects/p/instances/i/databases`.
    pub fn databases_path(&self) -> String {
        format!("{}/databases", self.instance_path())
    }

    /// Path of the database itself; the value every session-level RPC wants.
    pub fn path(&self) -> String {
        format!("{}/{}", self.databases_path(), self.database)
    }
}
