mod vector_ranking;
