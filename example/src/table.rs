use pgmini::{Connection, Value};

pub fn run(conn: &mut Connection) -> pgmini::Result<()> {
    let mut cur = conn.cursor();

    cur.execute("CREATE TABLE customers (id int, name varchar(40))", &[])?;
    cur.execute("INSERT INTO customers VALUES (%s, %s)", &[Value::Int(1), "Alice".into()])?;
    cur.execute(
        "INSERT INTO customers VALUES (%s, %s)",
        &[Value::Int(2), "Bob".into()],
    )?;

    cur.execute("SELECT id, name FROM customers ORDER BY id", &[])?;
    println!("{} customers", cur.rowcount());
    for row in cur.fetchall()? {
        println!("{row:?}");
    }

    cur.execute("DELETE FROM customers WHERE id = %s", &[Value::Int(1)])?;
    cur.execute("DROP TABLE customers", &[])?;
    drop(cur);

    conn.commit()
}
