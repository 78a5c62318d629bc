// End-to-end: mapping unit -> registry -> session -> in-memory SQLite
use sqlmapper::backend::SqliteTransaction;
use sqlmapper::binding::CollectionKind;
use sqlmapper::{
    Arg, MapperError, MapperInterface, MappingUnit, MethodDecl, MethodResult, ParamDecl, RegistryBuilder, ReturnKind,
    RowBounds, Session, Settings, StatementRegistry, Value,
};
use std::ops::ControlFlow;
use std::sync::Arc;

const USER_MAPPER: &str = r#"<?xml version="1.0" encoding="UTF-8" ?>
<mapper namespace="blog.UserMapper">
  <resultMap id="userWithPosts" type="User">
    <id property="id" column="user_id"/>
    <result property="name" column="user_name"/>
    <collection property="posts" ofType="Post">
      <id property="id" column="post_id"/>
      <result property="title" column="post_title"/>
    </collection>
  </resultMap>

  <sql id="userColumns">${alias}.id AS user_id, ${alias}.name AS user_name</sql>

  <select id="findWithPosts" resultMap="userWithPosts">
    SELECT <include refid="userColumns"><property name="alias" value="u"/></include>,
           p.id AS post_id, p.title AS post_title
    FROM users u LEFT JOIN posts p ON p.user_id = u.id
    ORDER BY u.id, p.id
  </select>

  <select id="findAll" resultType="map">SELECT id, name FROM users ORDER BY id</select>
  <select id="findById" resultType="map">SELECT id, name FROM users WHERE id = #{id}</select>
  <select id="countUsers" resultType="long">SELECT COUNT(*) FROM users</select>

  <insert id="insertUser" useGeneratedKeys="true" keyProperty="id">
    INSERT INTO users (name) VALUES (#{name})
  </insert>

  <insert id="insertWithKey">
    <selectKey keyProperty="id" resultType="int" order="BEFORE">
      SELECT COALESCE(MAX(id), 0) + 100 FROM users
    </selectKey>
    INSERT INTO users (id, name) VALUES (#{id}, #{name})
  </insert>

  <insert id="insertTagged" useGeneratedKeys="true" keyProperty="id">
    INSERT INTO users (name) VALUES (#{user.name})
  </insert>

  <insert id="insertThenKey">
    <selectKey keyProperty="id" resultType="long" order="AFTER">
      SELECT last_insert_rowid()
    </selectKey>
    INSERT INTO users (name) VALUES (#{name})
  </insert>

  <resultMap id="userWithPostSelect" type="User">
    <id property="id" column="id"/>
    <result property="name" column="name"/>
    <collection property="posts" column="id" select="postsByUser"/>
  </resultMap>
  <select id="postsByUser" resultType="map">SELECT id, title FROM posts WHERE user_id = #{id} ORDER BY id</select>
  <select id="findUsersWithPostSelect" resultMap="userWithPostSelect">SELECT id, name FROM users ORDER BY id</select>

  <update id="rename">UPDATE users SET name = #{name} WHERE id = #{id}</update>
  <update id="touchAll">UPDATE users SET name = name</update>
  <delete id="deleteByPk">DELETE FROM users WHERE id = #{id}</delete>
  <delete id="purge">DELETE FROM users WHERE id = #{id}</delete>
</mapper>
"#;

const SCHEMA: &str = "
    CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
    CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER, title TEXT);
    INSERT INTO users (id, name) VALUES (1, 'ann'), (2, 'bob');
    INSERT INTO posts (id, user_id, title) VALUES (10, 1, 'first'), (11, 1, 'second');
";

fn user_mapper() -> MapperInterface {
    MapperInterface::new("blog.UserMapper")
        .method(MethodDecl::new("insertUser", vec![ParamDecl::value()], ReturnKind::Int { nullable: false }))
        .method(MethodDecl::new("deleteByPk", vec![ParamDecl::value()], ReturnKind::Bool { nullable: false }))
        .method(MethodDecl::new(
            "rename",
            vec![ParamDecl::tagged("id"), ParamDecl::tagged("name")],
            ReturnKind::Int { nullable: false },
        ))
        .method(MethodDecl::new("countUsers", vec![], ReturnKind::Long { nullable: false }))
        .method(MethodDecl::new("findById", vec![ParamDecl::value()], ReturnKind::One { nullable: false }))
        .method(MethodDecl::new(
            "findAll",
            vec![ParamDecl::row_bounds()],
            ReturnKind::Many(CollectionKind::Deque),
        ))
        .method(MethodDecl::new("missing", vec![], ReturnKind::Void))
        .method(MethodDecl::new(
            "insertTagged",
            vec![ParamDecl::tagged("user")],
            ReturnKind::Int { nullable: false },
        ))
        .method(MethodDecl::new("touchAll", vec![], ReturnKind::Long { nullable: false }))
        .method(MethodDecl::new("purge", vec![ParamDecl::value()], ReturnKind::Void))
        .method(MethodDecl::new("findWithPosts", vec![], ReturnKind::Cursor))
}

fn registry() -> Arc<StatementRegistry> {
    let mut builder = RegistryBuilder::new(Settings::default());
    builder
        .add_mapper(user_mapper())
        .add_mapper(MapperInterface::new("blog.AdminMapper").extending("blog.UserMapper"))
        .add_unit(&MappingUnit::new("user_mapper.xml", USER_MAPPER));
    builder.build().unwrap()
}

fn session() -> Session {
    let mut session = Session::new(registry(), Box::new(SqliteTransaction::in_memory().unwrap()));
    session.execute_script(SCHEMA).unwrap();
    session
}

#[test]
fn test_nested_collection_groups_rows_by_id() {
    let mut session = session();
    let users = session
        .select_list("findWithPosts", &Value::Null, RowBounds::default())
        .unwrap();
    assert_eq!(users.len(), 2);

    let ann = &users[0];
    assert_eq!(ann.get("id"), Some(&Value::Integer(1)));
    assert_eq!(ann.get("name"), Some(&Value::from("ann")));
    let posts = ann.get("posts").and_then(Value::as_array).unwrap();
    let titles: Vec<_> = posts.iter().filter_map(|p| p.get("title")).collect();
    assert_eq!(titles, vec![&Value::from("first"), &Value::from("second")]);

    let bob = &users[1];
    assert_eq!(bob.get("name"), Some(&Value::from("bob")));
    assert_eq!(bob.get("posts"), Some(&Value::Array(vec![])));
}

#[test]
fn test_select_one_rejects_multiple_rows() {
    let mut session = session();
    let err = session.select_one("findAll", &Value::Null).unwrap_err();
    assert!(matches!(err, MapperError::TooManyResults(2)));

    let one = session
        .select_one("blog.UserMapper.findById", &Value::Integer(2))
        .unwrap()
        .unwrap();
    assert_eq!(one.get("name"), Some(&Value::from("bob")));
    assert_eq!(session.select_one("findById", &Value::Integer(99)).unwrap(), None);
}

#[test]
fn test_select_map_keys_by_property() {
    let mut session = session();
    let by_id = session
        .select_map("findAll", &Value::Null, "id", RowBounds::default())
        .unwrap();
    assert_eq!(by_id.keys().collect::<Vec<_>>(), vec!["1", "2"]);
    assert_eq!(by_id["2"].get("name"), Some(&Value::from("bob")));
}

#[test]
fn test_row_bounds_cursor_and_handler() {
    let mut session = session();
    let page = session
        .select_list("findAll", &Value::Null, RowBounds::new(1, 5))
        .unwrap();
    assert_eq!(page.len(), 1);

    {
        let cursor = session
            .select_cursor("findAll", &Value::Null, RowBounds::default())
            .unwrap();
        let names: Vec<_> = cursor
            .map(|row| row.unwrap().get("name").cloned().unwrap_or_default())
            .collect();
        assert_eq!(names, vec![Value::from("ann"), Value::from("bob")]);
    }

    let mut seen = Vec::new();
    let mut handler = |value: Value| {
        seen.push(value);
        ControlFlow::Break(())
    };
    session
        .select_with_handler("findAll", &Value::Null, RowBounds::default(), &mut handler)
        .unwrap();
    assert_eq!(seen.len(), 1);
}

#[test]
fn test_closed_cursor_refuses_fetch() {
    let mut session = session();
    let mut cursor = session
        .select_cursor("findAll", &Value::Null, RowBounds::default())
        .unwrap();
    assert!(cursor.fetch().unwrap().is_some());
    cursor.close();
    assert!(matches!(cursor.fetch(), Err(MapperError::CursorClosed)));
}

#[test]
fn test_generated_keys_are_written_back_to_arguments() {
    let mut session = session();
    let mut mapper = session.mapper("blog.UserMapper").unwrap();
    let mut args = [Arg::Value(Value::object([("name", Value::from("cy"))]))];
    let result = mapper.call("insertUser", &mut args).unwrap();
    assert_eq!(result.as_int(), Some(1));
    assert_eq!(args[0].as_value().and_then(|v| v.get("id")), Some(&Value::Integer(3)));
}

#[test]
fn test_select_key_runs_before_insert() {
    let mut session = session();
    let mut user = Value::object([("name", Value::from("dee"))]);
    assert_eq!(session.insert("insertWithKey", &mut user).unwrap(), 1);
    assert_eq!(user.get("id"), Some(&Value::Integer(102)));

    let stored = session.select_one("findById", &Value::Integer(102)).unwrap().unwrap();
    assert_eq!(stored.get("name"), Some(&Value::from("dee")));
}

#[test]
fn test_row_count_coercion() {
    let mut session = session();
    let mut mapper = session.mapper("blog.UserMapper").unwrap();

    let renamed = mapper
        .call("rename", &mut [Arg::Value(Value::Integer(2)), Arg::Value(Value::from("rob"))])
        .unwrap();
    assert!(matches!(renamed, MethodResult::Int(1)));

    let deleted = mapper.call("deleteByPk", &mut [Arg::Value(Value::Integer(1))]).unwrap();
    assert_eq!(deleted.as_bool(), Some(true));
    let deleted = mapper.call("deleteByPk", &mut [Arg::Value(Value::Integer(1))]).unwrap();
    assert_eq!(deleted.as_bool(), Some(false));

    let count = mapper.call("countUsers", &mut []).unwrap();
    assert_eq!(count.as_long(), Some(1));
}

#[test]
fn test_non_nullable_single_result_requires_a_row() {
    let mut session = session();
    let mut mapper = session.mapper("blog.UserMapper").unwrap();
    let err = mapper.call("findById", &mut [Arg::Value(Value::Integer(42))]).unwrap_err();
    assert!(matches!(err, MapperError::NullForNonNullable { .. }));
}

#[test]
fn test_inherited_methods_resolve_to_the_declaring_namespace() {
    let mut session = session();
    let mut admin = session.mapper("blog.AdminMapper").unwrap();
    let count = admin.call("countUsers", &mut []).unwrap();
    assert_eq!(count.as_long(), Some(2));
}

#[test]
fn test_method_binding_errors() {
    let mut session = session();
    let mut mapper = session.mapper("blog.UserMapper").unwrap();

    assert!(matches!(
        mapper.call("missing", &mut []),
        Err(MapperError::StatementNotBound(id)) if id == "blog.UserMapper.missing"
    ));
    assert!(matches!(
        mapper.call("notDeclared", &mut []),
        Err(MapperError::UnknownMethod { .. })
    ));
    assert!(matches!(
        mapper.call("deleteByPk", &mut []),
        Err(MapperError::ArgumentCount { expected: 1, actual: 0, .. })
    ));
}

#[test]
fn test_collection_return_kinds() {
    let mut session = session();
    let mut mapper = session.mapper("blog.UserMapper").unwrap();
    let result = mapper
        .call("findAll", &mut [Arg::RowBounds(RowBounds::new(0, 1))])
        .unwrap();
    match result {
        MethodResult::Deque(items) => assert_eq!(items.len(), 1),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_unknown_mapper_is_reported() {
    let mut session = session();
    assert!(matches!(
        session.mapper("blog.Nope"),
        Err(MapperError::UnknownMapper(name)) if name == "blog.Nope"
    ));
}

fn names_and_post_ids(values: &[Value]) -> Vec<(Value, Vec<Value>)> {
    values
        .iter()
        .map(|user| {
            let posts = user
                .get("posts")
                .and_then(Value::as_array)
                .map(|posts| posts.iter().filter_map(|p| p.get("id")).cloned().collect())
                .unwrap_or_default();
            (user.get("name").cloned().unwrap_or_default(), posts)
        })
        .collect()
}

#[test]
fn test_cursor_groups_joined_rows_like_a_list() {
    let mut session = session();
    let listed = session
        .select_list("findWithPosts", &Value::Null, RowBounds::default())
        .unwrap();
    let streamed: Vec<Value> = session
        .select_cursor("findWithPosts", &Value::Null, RowBounds::default())
        .unwrap()
        .collect::<sqlmapper::Result<_>>()
        .unwrap();
    assert_eq!(streamed, listed);
    assert_eq!(
        names_and_post_ids(&streamed),
        vec![
            (Value::from("ann"), vec![Value::Integer(10), Value::Integer(11)]),
            (Value::from("bob"), vec![]),
        ]
    );
}

#[test]
fn test_cursor_runs_nested_selects() {
    let mut session = session();
    let listed = session
        .select_list("findUsersWithPostSelect", &Value::Null, RowBounds::default())
        .unwrap();
    let mut cursor = session
        .select_cursor("findUsersWithPostSelect", &Value::Null, RowBounds::default())
        .unwrap();
    let mut streamed = Vec::new();
    while let Some(user) = cursor.fetch().unwrap() {
        streamed.push(user);
    }
    assert_eq!(cursor.current_index(), 2);
    drop(cursor);

    assert_eq!(streamed, listed);
    assert_eq!(
        names_and_post_ids(&streamed),
        vec![
            (Value::from("ann"), vec![Value::Integer(10), Value::Integer(11)]),
            (Value::from("bob"), vec![]),
        ]
    );
}

#[test]
fn test_cursor_methods_are_called_separately() {
    let mut session = session();
    let mut mapper = session.mapper("blog.UserMapper").unwrap();
    assert!(matches!(
        mapper.call("findWithPosts", &mut []),
        Err(MapperError::UnsupportedReturnType { .. })
    ));
    assert!(matches!(
        mapper.call_cursor("countUsers", &mut []),
        Err(MapperError::UnsupportedReturnType { .. })
    ));

    let users: Vec<Value> = mapper
        .call_cursor("findWithPosts", &mut [])
        .unwrap()
        .collect::<sqlmapper::Result<_>>()
        .unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(
        users[0].get("posts").and_then(Value::as_array).map(<[Value]>::len),
        Some(2)
    );
}

#[test]
fn test_generated_key_reaches_a_tagged_argument() {
    let mut session = session();
    let mut mapper = session.mapper("blog.UserMapper").unwrap();
    let mut args = [Arg::Value(Value::object([("name", Value::from("eve"))]))];
    let result = mapper.call("insertTagged", &mut args).unwrap();
    assert_eq!(result, MethodResult::Int(1));
    assert_eq!(args[0].as_value().and_then(|v| v.get("id")), Some(&Value::Integer(3)));
}

#[test]
fn test_mutation_row_count_as_long_and_void() {
    let mut session = session();
    let mut mapper = session.mapper("blog.UserMapper").unwrap();

    let touched = mapper.call("touchAll", &mut []).unwrap();
    assert_eq!(touched, MethodResult::Long(2));

    let purged = mapper.call("purge", &mut [Arg::Value(Value::Integer(99))]).unwrap();
    assert!(purged.is_void());
}

#[test]
fn test_select_key_runs_after_insert() {
    let mut session = session();
    let mut user = Value::object([("name", Value::from("fay"))]);
    assert_eq!(session.insert("insertThenKey", &mut user).unwrap(), 1);
    assert_eq!(user.get("id"), Some(&Value::Integer(3)));

    let stored = session.select_one("findById", &Value::Integer(3)).unwrap().unwrap();
    assert_eq!(stored.get("name"), Some(&Value::from("fay")));
}
